//! Error type definitions for the playback monitor
//!
//! Session-lifecycle failures surface to the caller as [`PlayerError`].
//! Failures raised by the external engine are reported as [`EngineError`] and
//! wrapped where they cross the session boundary. Track selection problems are
//! non-fatal and reported as [`TrackSelectionWarning`].

use thiserror::Error;

use crate::session::SessionState;

/// Top-level error type for session, track and sampler operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlayerError {
    /// The platform lacks a capability the engine requires
    #[error("Engine unsupported: {reason}")]
    EngineUnsupported { reason: String },

    /// No rendering sink was supplied at initialization
    #[error("No media sink provided")]
    SinkMissing,

    /// The engine rejected a manifest; the caller may retry with another URI
    #[error("Load failed for {uri}: {cause}")]
    LoadFailed { uri: String, cause: String },

    /// Rejected external input (e.g. a subtitle upload)
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Statistics could not be read this tick
    #[error("Stats unavailable: {message}")]
    StatsUnavailable { message: String },

    /// The session was already torn down
    #[error("Operation on destroyed session: {operation}")]
    SessionDestroyed { operation: String },

    /// The operation is not valid in the current session state
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: String,
        state: SessionState,
    },

    /// Invalid sampler or session configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Engine call failed outside of load/stats
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Errors reported by an adaptive-streaming engine implementation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The engine does not expose the requested capability
    #[error("Capability not supported: {capability}")]
    Unsupported { capability: String },

    /// An engine call failed
    #[error("{operation} failed: {message}")]
    Operation { operation: String, message: String },

    /// The engine instance was destroyed
    #[error("Engine has been destroyed")]
    Destroyed,
}

/// Non-fatal outcome of a track selection that could not be applied
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackSelectionWarning {
    #[error("Quality index {index} out of range ({available} variants available)")]
    QualityIndexOutOfRange { index: usize, available: usize },

    #[error("Subtitle index {index} out of range ({available} subtitle tracks available)")]
    SubtitleIndexOutOfRange { index: usize, available: usize },
}

impl PlayerError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn load_failed<U: Into<String>, C: Into<String>>(uri: U, cause: C) -> Self {
        Self::LoadFailed {
            uri: uri.into(),
            cause: cause.into(),
        }
    }

    pub fn destroyed<S: Into<String>>(operation: S) -> Self {
        Self::SessionDestroyed {
            operation: operation.into(),
        }
    }

    pub fn invalid_state<S: Into<String>>(operation: S, state: SessionState) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state,
        }
    }

    /// Whether the caller can reasonably retry the operation
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::LoadFailed { .. } | Self::Validation { .. } | Self::StatsUnavailable { .. }
        )
    }
}

impl EngineError {
    pub fn operation<O: Into<String>, M: Into<String>>(operation: O, message: M) -> Self {
        Self::Operation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn unsupported<S: Into<String>>(capability: S) -> Self {
        Self::Unsupported {
            capability: capability.into(),
        }
    }
}
