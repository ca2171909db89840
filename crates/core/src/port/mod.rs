// Port Layer - Interfaces for external collaborators

pub mod process_launcher;
pub mod recording;
pub mod sorting_extractor;
pub mod time_provider; // For deterministic testing
pub mod version_probe;

// Re-exports
pub use process_launcher::{ExecutionError, ExecutionResult, ExecutionStatus, ProcessLauncher};
pub use recording::Recording;
pub use sorting_extractor::SortingExtractor;
pub use time_provider::TimeProvider;
pub use version_probe::VersionProbe;
