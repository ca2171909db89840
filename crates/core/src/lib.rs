// Kilosort Core - Domain Logic & Ports
// NO infrastructure dependencies (hexagonal layout)

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name under which the sorter reports itself (log file, run log, script name)
pub const SORTER_NAME: &str = "kilosort";
