//! Multi-camera streaming server with runtime source switching and a
//! target-detection loop.

pub mod cli;
pub mod config;
pub mod control;
pub mod health;
pub mod registry;
pub mod server;
pub mod startup;
pub mod stream;
pub mod switch;
pub mod telemetry;
