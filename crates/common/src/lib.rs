//! Veneer Common Utilities
//!
//! Shared infrastructure for all Veneer crates:
//! - Error types and result aliases
//! - Microsecond timestamp helpers
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
