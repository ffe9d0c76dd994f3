//! Centralized error handling for the playback monitor
//!
//! # Error Categories
//!
//! - **Lifecycle Errors**: engine support, missing sink, load failures, destroyed sessions
//! - **Validation Errors**: rejected external subtitle input
//! - **Sampler Errors**: transient statistics failures, contained per tick
//! - **Selection Warnings**: invalid track indices, logged without state change
//!
//! # Usage
//!
//! ```rust
//! use playback_monitor::errors::{PlayerError, PlayerResult};
//!
//! fn example_function() -> PlayerResult<String> {
//!     Err(PlayerError::validation("not a .vtt file"))
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using PlayerError
pub type PlayerResult<T> = Result<T, PlayerError>;

/// Convenience type alias for engine call Results
pub type EngineResult<T> = Result<T, EngineError>;
