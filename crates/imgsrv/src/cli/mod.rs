//! Subcommand implementations.

pub mod config;
pub mod coordinator;
pub mod derive;
pub mod serve;
