//! Runtime bootstrap: telemetry and payload files.

pub mod error;
pub mod payload;
pub mod telemetry;
