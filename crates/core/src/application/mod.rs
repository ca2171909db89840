// Application Layer - Use cases for one sorter run

pub mod constants;
pub mod installation;
pub mod sorter;
pub mod templates;

// Re-exports
pub use installation::{check_if_installed, installation_message, KilosortInstallation};
pub use sorter::{KilosortSorter, RunOptions};
pub use templates::{RenderContext, TemplateSet};
