//! Diagnostic snapshot published after every tick

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::buffered_ahead::BufferSource;
use crate::engine::EngineStats;

/// Values computed from one successful statistics read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSnapshot {
    pub time: DateTime<Local>,
    /// Mbps, two decimals
    pub estimated_bandwidth: Option<f64>,
    /// Seconds buffered ahead, two decimals
    pub buffer_len: Option<f64>,
    pub buffer_source: Option<BufferSource>,
    /// kbps, whole number
    pub current_bitrate_kbps: Option<f64>,
    /// Names of the raw statistics the engine reported
    pub stats_keys: Vec<String>,
    pub stats: EngineStats,
}

/// Latest sampler outcome shown to the user
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Diagnostic {
    #[default]
    Empty,
    /// Nothing to sample this tick
    Idle { reason: String },
    /// The statistics query failed
    Failure { time: DateTime<Local>, message: String },
    Snapshot(DiagnosticSnapshot),
}

impl Diagnostic {
    pub fn snapshot(&self) -> Option<&DiagnosticSnapshot> {
        match self {
            Self::Snapshot(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    /// Display text: pretty JSON for snapshots, the message otherwise
    pub fn text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Idle { reason } => reason.clone(),
            Self::Failure { message, .. } => format!("Error getting stats: {message}"),
            Self::Snapshot(snapshot) => serde_json::to_string_pretty(snapshot)
                .unwrap_or_else(|e| format!("unserializable snapshot: {e}")),
        }
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
