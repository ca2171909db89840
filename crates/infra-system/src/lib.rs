// Kilosort Infrastructure - System Adapters
// Implements: ProcessLauncher, VersionProbe, Recording, SortingExtractor

pub mod git_version_probe;
pub mod phy_folder_extractor;
pub mod raw_recording;
pub mod shell_script_launcher;

pub use git_version_probe::GitVersionProbe;
pub use phy_folder_extractor::PhyFolderExtractor;
pub use raw_recording::{RawBinaryRecording, SampleFormat};
pub use shell_script_launcher::ShellScriptLauncher;
