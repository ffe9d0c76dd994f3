pub mod chart;
pub mod config;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod player;
pub mod session;
pub mod tracks;

pub use player::Player;
