mod command;
mod config;
mod flow;
#[cfg(feature = "gpio")]
mod hw;
mod monitor;
mod pump;
mod sensor;
#[cfg(all(feature = "sim", not(feature = "gpio")))]
mod sim;
mod state;
mod telemetry;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, str::FromStr, sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{error, info, warn};

use command::{handle_command, CommandCodec, TOPIC_COMMAND};
use config::Config;
use flow::PulseCounter;
use pump::{PumpController, Relay};
use state::StateStore;

#[cfg(not(any(feature = "sim", feature = "gpio")))]
compile_error!("enable the `sim` feature (default) or `gpio` for real hardware");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let mut cfg = config::load_or_default(&config_path)?;

    // Broker overrides for container deployments.
    if let Ok(host) = env::var("MQTT_HOST") {
        cfg.broker.host = host;
    }
    if let Some(port) = env::var("MQTT_PORT").ok().and_then(|s| s.parse().ok()) {
        cfg.broker.port = port;
    }

    let codec = CommandCodec::from_str(&cfg.command.codec).map_err(anyhow::Error::msg)?;

    // ── Shared state ────────────────────────────────────────────────
    let store = Arc::new(StateStore::new());
    let counter = Arc::new(PulseCounter::default());

    // ── Pump ────────────────────────────────────────────────────────
    let relay = Relay::new(cfg.pump.gpio_pin as u8, cfg.pump.active_low)?;
    let mut pump = PumpController::new(relay, Arc::clone(&store));

    // ── Sensors and flow pulses ─────────────────────────────────────
    // On hardware the returned guard owns the interrupt pin; dropping it
    // would disarm the flow counter.
    let _flow_source = spawn_sensor_backends(&cfg, &store, &counter)?;

    tokio::spawn(flow::flow_task(
        Arc::clone(&store),
        Arc::clone(&counter),
        cfg.sampling.flow_drain_ms,
        cfg.flow.ml_per_pulse,
    ));
    tokio::spawn(monitor::monitor_task(
        Arc::clone(&store),
        cfg.sampling.monitor_ms,
    ));

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new(
        cfg.broker.client_id.clone(),
        cfg.broker.host.clone(),
        cfg.broker.port,
    );
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);

    tokio::spawn(telemetry::telemetry_task(
        Arc::clone(&store),
        client.clone(),
        cfg.sampling.telemetry_ms,
    ));

    info!(
        host = %cfg.broker.host,
        port = cfg.broker.port,
        codec = %cfg.command.codec,
        "connecting to mqtt broker"
    );

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                store.set_broker_connected(true).await;
                // Subscribe on every session; the broker does not keep ours
                // across reconnects.
                if let Err(e) = client.subscribe(TOPIC_COMMAND, QoS::AtLeastOnce).await {
                    error!("mqtt subscribe failed: {e}");
                }
            }
            Ok(Event::Incoming(Packet::Publish(p))) => {
                if p.topic == TOPIC_COMMAND {
                    if let Err(reason) = handle_command(codec, &p.payload, &mut pump).await {
                        warn!(%reason, "command rejected");
                    }
                } else {
                    warn!(topic = %p.topic, "unhandled topic");
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                // Watering continues offline; only telemetry pauses.
                warn!("mqtt disconnected");
                store.set_broker_connected(false).await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt error: {e}, reconnecting");
                store.set_broker_connected(false).await;
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

// ── Sensor backends ─────────────────────────────────────────────────

/// Spawn the sampling tasks against the real I2C sensors and arm the flow
/// interrupt. The returned pin guard must live as long as the program.
#[cfg(feature = "gpio")]
fn spawn_sensor_backends(
    cfg: &Config,
    store: &Arc<StateStore>,
    counter: &Arc<PulseCounter>,
) -> Result<hw::FlowPulseInput> {
    let bus = Arc::new(std::sync::Mutex::new(hw::Ads1115::new(cfg.adc.i2c_addr)?));

    tokio::spawn(sensor::climate_task(
        Arc::clone(store),
        hw::Sht31::new(cfg.climate.i2c_addr)?,
        cfg.sampling.climate_ms,
    ));
    tokio::spawn(sensor::soil_task(
        Arc::clone(store),
        hw::AdsInput::new(Arc::clone(&bus), cfg.adc.soil_channel),
        cfg.sampling.soil_ms,
    ));
    tokio::spawn(sensor::rain_task(
        Arc::clone(store),
        hw::AdsInput::new(bus, cfg.adc.rain_channel),
        cfg.sampling.rain_ms,
    ));

    hw::FlowPulseInput::new(cfg.flow.gpio_pin as u8, Arc::clone(counter))
}

/// Spawn the sampling tasks against simulated sensors, plus a pulse source
/// that stands in for the flow interrupt.
#[cfg(all(feature = "sim", not(feature = "gpio")))]
fn spawn_sensor_backends(
    cfg: &Config,
    store: &Arc<StateStore>,
    counter: &Arc<PulseCounter>,
) -> Result<()> {
    let scenario = sim::Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    info!(%scenario, "simulated sensors active");

    tokio::spawn(sensor::climate_task(
        Arc::clone(store),
        sim::ClimateSim::new(scenario),
        cfg.sampling.climate_ms,
    ));
    tokio::spawn(sensor::soil_task(
        Arc::clone(store),
        sim::SoilSim::new(scenario),
        cfg.sampling.soil_ms,
    ));
    tokio::spawn(sensor::rain_task(
        Arc::clone(store),
        sim::RainSim::new(scenario),
        cfg.sampling.rain_ms,
    ));
    tokio::spawn(sim::pulse_feed(Arc::clone(store), Arc::clone(counter)));

    Ok(())
}
