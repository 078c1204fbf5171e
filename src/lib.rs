//! Transfer cache for server-side rendering handoff.
//!
//! A producer render pass records every outbound HTTP response into a shared
//! state store; the consumer pass that re-renders from the handed-over store
//! replays those responses instead of going to the network, until the
//! application becomes stable.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
