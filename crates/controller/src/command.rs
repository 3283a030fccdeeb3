//! Inbound command decoding and dispatch. Two codecs sit behind one
//! interface: a 38-byte binary frame carrying a SHA-256 integrity tag, and a
//! JSON command object. Which codec is active is a startup decision taken
//! from configuration; both are always compiled.

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::pump::PumpController;
use crate::state::PumpMode;

// ---------------------------------------------------------------------------
// Wire constants
// ---------------------------------------------------------------------------

/// Topic the controller subscribes to for inbound commands.
pub const TOPIC_COMMAND: &str = "device/command";

/// Binary frame layout: action(1) + duration u32 LE(4) + mode(1) + tag(32).
pub const FRAME_LEN: usize = 38;
/// The tag covers only the header bytes in front of it.
const TAGGED_LEN: usize = 6;

const ACTION_STOP: u8 = 0;
const ACTION_START: u8 = 1;

// ---------------------------------------------------------------------------
// Reject reasons
// ---------------------------------------------------------------------------

/// Why an inbound command was refused. Rejection never changes state; the
/// event loop logs the reason and moves on.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("frame too short: {len} of {FRAME_LEN} bytes")]
    TooShort { len: usize },
    #[error("integrity tag mismatch")]
    IntegrityMismatch,
    #[error("unknown action byte {0}")]
    UnknownAction(u8),
    #[error("malformed json command: {0}")]
    MalformedJson(String),
    #[error("unknown json command '{0}'")]
    UnknownCommand(String),
}

// ---------------------------------------------------------------------------
// Codec selection
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandCodec {
    Binary,
    Json,
}

impl FromStr for CommandCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binary" => Ok(CommandCodec::Binary),
            "json" => Ok(CommandCodec::Json),
            other => Err(format!(
                "unknown command codec '{other}' (expected 'binary' or 'json')"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Decoded commands
// ---------------------------------------------------------------------------

/// A validated command, ready for dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Start {
        duration: Duration,
        mode: PumpMode,
    },
    /// `mode` is present on the binary path only: a binary stop frame
    /// carries a mode byte and applies it after stopping.
    Stop {
        run_time: Duration,
        mode: Option<PumpMode>,
    },
    SetMode(PumpMode),
}

pub fn decode(codec: CommandCodec, payload: &[u8]) -> Result<Command, RejectReason> {
    match codec {
        CommandCodec::Binary => decode_binary(payload),
        CommandCodec::Json => decode_json(payload),
    }
}

// ---------------------------------------------------------------------------
// Binary codec
// ---------------------------------------------------------------------------

/// Checks run in a fixed order: length, then integrity, then action. Bytes
/// past the frame length are ignored.
fn decode_binary(payload: &[u8]) -> Result<Command, RejectReason> {
    if payload.len() < FRAME_LEN {
        return Err(RejectReason::TooShort { len: payload.len() });
    }

    let expected = Sha256::digest(&payload[..TAGGED_LEN]);
    if expected.as_slice() != &payload[TAGGED_LEN..FRAME_LEN] {
        return Err(RejectReason::IntegrityMismatch);
    }

    let duration_s = u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]);
    let duration = Duration::from_secs(u64::from(duration_s));
    let mode = PumpMode::from_wire(payload[5]);

    match payload[0] {
        ACTION_START => Ok(Command::Start { duration, mode }),
        ACTION_STOP => Ok(Command::Stop {
            run_time: duration,
            mode: Some(mode),
        }),
        other => Err(RejectReason::UnknownAction(other)),
    }
}

/// Build a well-formed binary frame. The remote sender computes the same
/// tag on its side; this end uses it for tooling and tests.
pub fn encode(action: u8, duration_s: u32, mode: u8) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_LEN);
    frame.push(action);
    frame.extend_from_slice(&duration_s.to_le_bytes());
    frame.push(mode);
    let tag = Sha256::digest(&frame[..TAGGED_LEN]);
    frame.extend_from_slice(&tag);
    frame
}

// ---------------------------------------------------------------------------
// JSON codec
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct JsonCommand {
    command: String,
    /// Seconds, in the same u32 range as the binary frame's duration field;
    /// oversized values fail decode. Used when `durationMs` is absent.
    duration: Option<u32>,
    #[serde(rename = "durationMs")]
    duration_ms: Option<u64>,
    /// Milliseconds the sender believes the pump ran.
    #[serde(rename = "runTime")]
    run_time: Option<u64>,
    mode: Option<String>,
}

fn decode_json(payload: &[u8]) -> Result<Command, RejectReason> {
    let cmd: JsonCommand =
        serde_json::from_slice(payload).map_err(|e| RejectReason::MalformedJson(e.to_string()))?;

    match cmd.command.as_str() {
        "pump_start" => {
            let ms = cmd
                .duration_ms
                .or_else(|| cmd.duration.map(|s| u64::from(s) * 1000))
                .unwrap_or(0);
            Ok(Command::Start {
                duration: Duration::from_millis(ms),
                mode: PumpMode::from_label(cmd.mode.as_deref()),
            })
        }
        "pump_stop" => Ok(Command::Stop {
            run_time: Duration::from_millis(cmd.run_time.unwrap_or(0)),
            mode: None,
        }),
        "set_mode" => Ok(Command::SetMode(PumpMode::from_label(cmd.mode.as_deref()))),
        other => Err(RejectReason::UnknownCommand(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Apply a decoded command to the pump controller.
pub async fn dispatch(cmd: Command, pump: &mut PumpController) {
    match cmd {
        Command::Start { duration, mode } => pump.start(duration, mode).await,
        Command::Stop { run_time, mode } => {
            pump.stop(run_time).await;
            if let Some(mode) = mode {
                pump.set_mode(mode).await;
            }
        }
        Command::SetMode(mode) => pump.set_mode(mode).await,
    }
}

/// Decode then dispatch. The caller owns logging of the reject reason.
pub async fn handle_command(
    codec: CommandCodec,
    payload: &[u8],
    pump: &mut PumpController,
) -> Result<(), RejectReason> {
    let cmd = decode(codec, payload)?;
    dispatch(cmd, pump).await;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
