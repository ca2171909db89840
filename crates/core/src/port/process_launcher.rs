// Process Launcher Port
// Abstraction for running the generated shell script as an external process

use crate::domain::ShellScript;
use async_trait::async_trait;
use thiserror::Error;

/// Result of a finished process
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub duration_ms: i64,
    /// None when the process was terminated by a signal
    pub exit_code: Option<i32>,
    /// Last lines of combined stdout/stderr
    pub output_tail: Vec<String>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success && self.exit_code == Some(0)
    }
}

/// Execution status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    Failed,
    Killed,
}

/// Execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Process timeout after {0}ms")]
    Timeout(u64),

    #[error("Process killed: {0}")]
    Killed(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Process Launcher trait
///
/// Implementations:
/// - ShellScriptLauncher: writes the script to disk and runs it with the system shell
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Run a script to completion and report its exit code
    ///
    /// A non-zero exit code is NOT an error at this layer; callers decide.
    ///
    /// # Errors
    /// - ExecutionError::SpawnFailed if the process cannot be started
    /// - ExecutionError::Timeout if `script.timeout` elapses first
    /// - ExecutionError::IoError if the script or log file cannot be written
    async fn launch(&self, script: &ShellScript) -> Result<ExecutionResult, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Mock launcher behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Finish with this exit code
        Exit(i32),
        /// Fail to spawn with message
        Fail(String),
        /// Timeout after N ms
        Timeout(u64),
    }

    type SideEffect = Box<dyn Fn(&ShellScript) + Send + Sync>;

    /// Mock Process Launcher for testing
    pub struct MockProcessLauncher {
        behavior: MockBehavior,
        side_effect: Option<SideEffect>,
        launched: Arc<Mutex<Vec<ShellScript>>>,
    }

    impl MockProcessLauncher {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior,
                side_effect: None,
                launched: Arc::new(Mutex::new(Vec::new())),
            }
        }
        pub fn new_success() -> Self {
            Self::new(MockBehavior::Exit(0))
        }
        pub fn new_exit(code: i32) -> Self {
            Self::new(MockBehavior::Exit(code))
        }
        /// Run `effect` on each launch, e.g. to create fake result files
        pub fn with_side_effect(
            mut self,
            effect: impl Fn(&ShellScript) + Send + Sync + 'static,
        ) -> Self {
            self.side_effect = Some(Box::new(effect));
            self
        }
        pub fn call_count(&self) -> usize {
            self.launched.lock().unwrap().len()
        }
        pub fn launched_scripts(&self) -> Vec<ShellScript> {
            self.launched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProcessLauncher for MockProcessLauncher {
        async fn launch(&self, script: &ShellScript) -> Result<ExecutionResult, ExecutionError> {
            self.launched.lock().unwrap().push(script.clone());

            if let Some(effect) = &self.side_effect {
                effect(script);
            }

            match &self.behavior {
                MockBehavior::Exit(code) => Ok(ExecutionResult {
                    status: if *code == 0 {
                        ExecutionStatus::Success
                    } else {
                        ExecutionStatus::Failed
                    },
                    duration_ms: 100,
                    exit_code: Some(*code),
                    output_tail: vec!["mock output".to_string()],
                }),
                MockBehavior::Fail(msg) => Err(ExecutionError::SpawnFailed(msg.clone())),
                MockBehavior::Timeout(ms) => Err(ExecutionError::Timeout(*ms)),
            }
        }
    }
}
