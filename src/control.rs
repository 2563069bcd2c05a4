// SPDX-License-Identifier: GPL-3.0-only

//! Line-oriented control-channel command parsing.
//!
//! Commands arrive as plain text from a subscriber's control side. Invalid
//! or out-of-range commands are logged and ignored rather than propagated as
//! an error — a malformed control line must never take down a pipeline.

use tracing::warn;

use crate::config::AeConfig;

/// A parsed, range-clamped control command.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    SetExpGain { exposure_ns: u64, gain: f32 },
    SetExp { exposure_ns: u64 },
    SetGain { gain: f32 },
    StartAe,
    StopAe,
    Snapshot { path: String },
    SnapshotNoSave,
}

/// Parse and clamp one control line. Returns `None` (after logging) for
/// anything malformed or out of range.
pub fn parse_command(line: &str, limits: &AeConfig) -> Option<ControlCommand> {
    let mut parts = line.split_whitespace();
    let verb = parts.next()?;

    match verb {
        "set_exp_gain" => {
            let exp_ms: f64 = parts.next()?.parse().ok()?;
            let gain: f32 = parts.next()?.parse().ok()?;
            let exposure_ns = clamp_exposure_ms(exp_ms, limits);
            let gain = gain.clamp(limits.gain_min, limits.gain_max);
            Some(ControlCommand::SetExpGain { exposure_ns, gain })
        }
        "set_exp" => {
            let exp_ms: f64 = parts.next()?.parse().ok()?;
            Some(ControlCommand::SetExp {
                exposure_ns: clamp_exposure_ms(exp_ms, limits),
            })
        }
        "set_gain" => {
            let gain: f32 = parts.next()?.parse().ok()?;
            Some(ControlCommand::SetGain {
                gain: gain.clamp(limits.gain_min, limits.gain_max),
            })
        }
        "start_ae" => Some(ControlCommand::StartAe),
        "stop_ae" => Some(ControlCommand::StopAe),
        "snapshot" => {
            let path = parts.next()?;
            Some(ControlCommand::Snapshot { path: path.to_string() })
        }
        "snapshot_no_save" => Some(ControlCommand::SnapshotNoSave),
        other => {
            warn!(command = other, "ignoring unrecognized control command");
            None
        }
    }
}

/// Parse a line, logging and dropping it on any failure (malformed syntax,
/// out-of-range arguments already clamped by [`parse_command`], or an
/// unrecognized verb).
pub fn parse_command_or_log(line: &str, limits: &AeConfig) -> Option<ControlCommand> {
    match parse_command(line, limits) {
        Some(cmd) => Some(cmd),
        None => {
            warn!(line, "ignoring malformed control command");
            None
        }
    }
}

fn clamp_exposure_ms(exp_ms: f64, limits: &AeConfig) -> u64 {
    let exposure_ns = (exp_ms * 1_000_000.0) as u64;
    exposure_ns.clamp(limits.exposure_min_ns, limits.exposure_max_ns)
}
