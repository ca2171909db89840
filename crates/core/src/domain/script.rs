// Shell Script Model
// The launcher writes `body` to `script_path` and runs it from `working_dir`

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Target shell flavour for the generated script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    /// Platform this binary was built for
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }

    /// File extension for script files (none on Unix)
    pub fn script_extension(&self) -> Option<&'static str> {
        match self {
            Platform::Unix => None,
            Platform::Windows => Some("bat"),
        }
    }
}

/// A script to be executed by a [`crate::port::ProcessLauncher`]
#[derive(Debug, Clone)]
pub struct ShellScript {
    pub body: String,
    pub platform: Platform,
    pub script_path: PathBuf,
    pub log_path: Option<PathBuf>,
    pub working_dir: PathBuf,
    /// Extra variables exported to the child process
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    /// Echo child output through tracing as it arrives
    pub verbose: bool,
}

impl ShellScript {
    /// Script that starts MATLAB in `output_folder` and runs `entry_point`
    ///
    /// The MATLAB entry point must call `quit(<code>)` itself; its exit code is
    /// the script's exit code.
    pub fn matlab(
        platform: Platform,
        output_folder: &Path,
        matlab_command: &str,
        entry_point: &str,
        script_name: &str,
    ) -> Self {
        let folder = output_folder.display();
        let body = match platform {
            Platform::Unix => format!(
                "#!/bin/bash\ncd \"{folder}\"\n{matlab_command} -nosplash -nodisplay -log -r {entry_point}\n"
            ),
            Platform::Windows => format!(
                "cd {folder}\r\n{matlab_command} -nosplash -wait -log -r {entry_point}\r\n"
            ),
        };

        let mut script_path = output_folder.join(script_name);
        if let Some(ext) = platform.script_extension() {
            script_path.set_extension(ext);
        }

        Self {
            body,
            platform,
            script_path,
            log_path: None,
            working_dir: output_folder.to_path_buf(),
            env: Vec::new(),
            timeout: None,
            verbose: false,
        }
    }

    pub fn with_log_path(mut self, log_path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(log_path.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}
