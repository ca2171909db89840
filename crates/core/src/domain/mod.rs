// Domain Layer - Pure value types for one sorter run

pub mod error;
pub mod geometry;
pub mod params;
pub mod run_report;
pub mod script;
pub mod sorting;

// Re-exports
pub use error::DomainError;
pub use geometry::{ChannelLocation, ProbeGeometry};
pub use params::{ResolvedParams, SorterParams};
pub use run_report::{RunReport, RUN_LOG_FILE};
pub use script::{Platform, ShellScript};
pub use sorting::{SortingOutput, Unit};
