//! A3S Stargz Core - Foundational Types
//!
//! Errors, path sets, configuration and logging setup shared by the
//! optimizer runtime and the CLI.

pub mod config;
pub mod error;
pub mod log;
pub mod paths;

// Re-export commonly used types
pub use config::{LogLevel, OptimizeConfig};
pub use error::{MissingScope, OptimizeError, Result, ResultExt};
pub use log::LogFormat;
pub use paths::{MissingSet, PathSet, PrioritySet};

/// A3S Stargz version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
