// Sorter constants (no magic values in the use cases)
use std::time::Duration;

/// Environment variable holding the Kilosort installation directory
pub const KILOSORT_PATH_ENV: &str = "KILOSORT_PATH";

/// File whose presence marks a usable Kilosort checkout
pub const INSTALL_MARKER_FILE: &str = "preprocessData.m";

/// Upstream repository users are pointed to when Kilosort is missing
pub const KILOSORT_REPOSITORY: &str = "https://github.com/cortex-lab/KiloSort";

/// Raw data file name (int16 interleaved) inside the output folder
pub const RECORDING_FILE: &str = "recording.dat";

/// Chunk size used when exporting the recording (500 MB)
pub const EXPORT_CHUNK_MB: usize = 500;

/// Generated MATLAB scripts
pub const MASTER_SCRIPT: &str = "kilosort_master.m";
pub const CONFIG_SCRIPT: &str = "kilosort_config.m";
pub const CHANNEL_MAP_SCRIPT: &str = "kilosort_channelmap.m";

/// MATLAB function invoked with `-r`
pub const MATLAB_ENTRY_POINT: &str = "kilosort_master";

/// Default MATLAB executable (resolved through PATH)
pub const DEFAULT_MATLAB_COMMAND: &str = "matlab";

/// Resolved parameters as written next to the scripts
pub const PARAMS_FILE: &str = "params.json";

/// Graceful process shutdown timeout before SIGKILL (5 seconds)
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lines of child output kept for error reporting
pub const OUTPUT_TAIL_LINES: usize = 20;
