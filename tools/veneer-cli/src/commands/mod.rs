//! CLI subcommand implementations.

pub mod check;
pub mod export;
pub mod probe;
