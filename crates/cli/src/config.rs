//! Runner configuration
//!
//! Sources, lowest to highest precedence:
//! 1. built-in defaults
//! 2. `kilosort.toml` in the user config directory
//! 3. the file passed with `--config`
//! 4. `KILOSORT_RUNNER__*` environment variables (`__` separates nesting,
//!    e.g. `KILOSORT_RUNNER__PARAMS__DETECT_THRESHOLD=5`)
//!
//! Command-line flags are applied on top by `main`.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kilosort_core::application::constants::DEFAULT_MATLAB_COMMAND;
use kilosort_core::application::RunOptions;
use kilosort_core::domain::{Platform, SorterParams};

const CONFIG_FILE_NAME: &str = "kilosort.toml";
const ENV_PREFIX: &str = "KILOSORT_RUNNER";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub kilosort_path: Option<String>,
    pub matlab_command: String,
    pub timeout_secs: Option<u64>,
    pub verbose: bool,
    pub remove_existing_folder: bool,
    /// None inherits the whole environment for the MATLAB process
    pub env_allowlist: Option<Vec<String>>,
    /// Cluster labels dropped when collecting results
    pub exclude_groups: Vec<String>,
    pub log_format: String,
    pub log_dir: Option<String>,
    pub params: SorterParams,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            kilosort_path: None,
            matlab_command: DEFAULT_MATLAB_COMMAND.to_string(),
            timeout_secs: None,
            verbose: false,
            remove_existing_folder: false,
            env_allowlist: None,
            exclude_groups: Vec::new(),
            log_format: "pretty".to_string(),
            log_dir: None,
            params: SorterParams::default(),
        }
    }
}

impl RunnerConfig {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            matlab_command: self.matlab_command.clone(),
            verbose: self.verbose,
            remove_existing_folder: self.remove_existing_folder,
            timeout: self.timeout_secs.map(Duration::from_secs),
            platform: Platform::current(),
        }
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.log_dir
            .as_deref()
            .map(|d| PathBuf::from(shellexpand::tilde(d).into_owned()))
    }
}

/// Default per-user config file location
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "kilosort", "kilosort-runner")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// Build the layered configuration
pub fn load(explicit: Option<&Path>) -> Result<RunnerConfig> {
    let mut builder = config::Config::builder();

    if let Some(user_file) = default_config_path() {
        builder = builder.add_source(config::File::from(user_file).required(false));
    }

    if let Some(path) = explicit {
        let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned());
        builder = builder.add_source(config::File::from(expanded).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("env_allowlist")
            .with_list_parse_key("exclude_groups"),
    );

    builder
        .build()
        .context("Failed to read configuration")?
        .try_deserialize()
        .context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.matlab_command, "matlab");
        assert_eq!(config.params, SorterParams::default());

        let options = config.run_options();
        assert!(options.timeout.is_none());
        assert!(!options.remove_existing_folder);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.toml");
        std::fs::write(
            &path,
            r#"
matlab_command = "/opt/matlab/bin/matlab"
timeout_secs = 3600
exclude_groups = ["noise"]

[params]
detect_threshold = 5.0
useGPU = false
NT = 32000
"#,
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();

        assert_eq!(config.matlab_command, "/opt/matlab/bin/matlab");
        assert_eq!(config.run_options().timeout, Some(Duration::from_secs(3600)));
        assert_eq!(config.exclude_groups, vec!["noise".to_string()]);
        assert_eq!(config.params.detect_threshold, 5.0);
        assert!(!config.params.use_gpu);
        assert_eq!(config.params.nt, Some(32000));
        // untouched keys keep their defaults
        assert_eq!(config.params.freq_min, 300.0);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_unknown_param_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.toml");
        std::fs::write(&path, "[params]\nnot_a_param = 1\n").unwrap();

        assert!(load(Some(&path)).is_err());
    }
}
