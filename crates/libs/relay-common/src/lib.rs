//! Shared configuration and tracing setup used by every Relay process.

pub mod config;
pub mod error;
pub mod tracing;

pub use config::RelayConfig;
pub use error::{BootError, Result};
