//! Capstan Common Utilities
//!
//! Shared infrastructure for all Capstan crates:
//! - Error types and result aliases
//! - Recording clock for frame timestamps
//! - Tracing/logging initialization
//! - Configuration loading
//! - Output and temporary file naming

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod naming;

pub use clock::*;
pub use config::*;
pub use error::*;
