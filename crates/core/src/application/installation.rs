// Installation discovery (KILOSORT_PATH)

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::constants::{INSTALL_MARKER_FILE, KILOSORT_PATH_ENV, KILOSORT_REPOSITORY};
use crate::error::{AppError, Result};

/// Message shown when no usable installation is found
pub fn installation_message() -> String {
    format!(
        "\nTo use Kilosort run:\n\n    \
         git clone {repo}\n\n\
         and provide the installation path by setting the {env} environment variable \
         or passing --kilosort-path.\n\n\
         More information on Kilosort at:\n    {repo}\n",
        repo = KILOSORT_REPOSITORY,
        env = KILOSORT_PATH_ENV,
    )
}

/// Strip surrounding double quotes, expand `~` and make the path absolute
fn normalize_path(raw: &str) -> std::io::Result<PathBuf> {
    let unquoted = match raw.strip_prefix('"') {
        Some(rest) => rest.strip_suffix('"').unwrap_or(rest),
        None => raw,
    };
    let expanded = PathBuf::from(shellexpand::tilde(unquoted).as_ref());

    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(std::env::current_dir()?.join(expanded))
    }
}

fn has_marker(path: &Path) -> bool {
    path.join(INSTALL_MARKER_FILE).is_file()
}

/// True iff `kilosort_path` points at a directory containing `preprocessData.m`
pub fn check_if_installed(kilosort_path: Option<&str>) -> bool {
    let Some(raw) = kilosort_path else {
        return false;
    };

    match normalize_path(raw) {
        Ok(path) => has_marker(&path),
        Err(e) => {
            debug!(path = %raw, error = %e, "Could not resolve Kilosort path");
            false
        }
    }
}

/// Location of the Kilosort checkout used for a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KilosortInstallation {
    path: Option<PathBuf>,
}

impl KilosortInstallation {
    /// Discover from the `KILOSORT_PATH` environment variable
    pub fn from_env() -> Self {
        match std::env::var(KILOSORT_PATH_ENV) {
            Ok(raw) if !raw.trim().is_empty() => Self::with_path(&raw),
            _ => {
                debug!(env = KILOSORT_PATH_ENV, "Kilosort path not set in environment");
                Self::default()
            }
        }
    }

    /// Use an explicit installation directory
    ///
    /// The path is absolutized; it is handed to the child process as
    /// `KILOSORT_PATH` rather than written into this process's environment.
    pub fn with_path(raw: &str) -> Self {
        let path = normalize_path(raw).ok();
        if let Some(p) = &path {
            info!(kilosort_path = %p.display(), "Using Kilosort installation path");
        }
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_installed(&self) -> bool {
        self.path.as_deref().is_some_and(has_marker)
    }

    /// Installation directory, or the installation message as an error
    pub fn require(&self) -> Result<&Path> {
        match self.path.as_deref() {
            Some(path) if has_marker(path) => Ok(path),
            _ => Err(AppError::NotInstalled(installation_message())),
        }
    }

    /// Variable to export to the sorter subprocess
    pub fn env_var(&self) -> Option<(String, String)> {
        self.path
            .as_ref()
            .map(|p| (KILOSORT_PATH_ENV.to_string(), p.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_install() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INSTALL_MARKER_FILE), "% marker").unwrap();
        dir
    }

    #[test]
    fn test_check_none_is_not_installed() {
        assert!(!check_if_installed(None));
    }

    #[test]
    fn test_check_missing_marker() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!check_if_installed(dir.path().to_str()));
    }

    #[test]
    fn test_check_with_marker() {
        let dir = fake_install();
        assert!(check_if_installed(dir.path().to_str()));
    }

    #[test]
    fn test_check_quoted_path() {
        let dir = fake_install();
        let quoted = format!("\"{}\"", dir.path().display());
        assert!(check_if_installed(Some(&quoted)));
    }

    #[test]
    fn test_marker_must_be_a_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(INSTALL_MARKER_FILE)).unwrap();
        assert!(!check_if_installed(dir.path().to_str()));
    }

    #[test]
    fn test_require_fails_fast_with_message() {
        let dir = tempfile::tempdir().unwrap();
        let installation = KilosortInstallation::with_path(dir.path().to_str().unwrap());

        assert!(!installation.is_installed());
        let err = installation.require().unwrap_err();
        assert!(matches!(err, AppError::NotInstalled(_)));
        assert!(err.to_string().contains(KILOSORT_PATH_ENV));
    }

    #[test]
    fn test_default_installation_has_no_path() {
        let installation = KilosortInstallation::default();
        assert!(installation.path().is_none());
        assert!(installation.env_var().is_none());
        assert!(installation.require().is_err());
    }

    #[test]
    fn test_require_returns_absolute_path() {
        let dir = fake_install();
        let installation = KilosortInstallation::with_path(dir.path().to_str().unwrap());

        let path = installation.require().unwrap();
        assert!(path.is_absolute());
        let (key, value) = installation.env_var().unwrap();
        assert_eq!(key, KILOSORT_PATH_ENV);
        assert_eq!(value, path.display().to_string());
    }

    #[test]
    fn test_relative_path_is_absolutized() {
        let installation = KilosortInstallation::with_path("some/relative/KiloSort");
        let path = installation.path().unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("some/relative/KiloSort"));
    }
}
