//! Operations behind the binary's subcommands.

pub mod error;
pub mod payload;
