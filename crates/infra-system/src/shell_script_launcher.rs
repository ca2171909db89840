// Shell script launcher
// reason: tokio for async process management, nix for process-group signals
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use kilosort_core::application::constants::{GRACEFUL_SHUTDOWN_TIMEOUT, OUTPUT_TAIL_LINES};
use kilosort_core::domain::{Platform, ShellScript};
use kilosort_core::port::process_launcher::{
    ExecutionError, ExecutionResult, ExecutionStatus, ProcessLauncher,
};
use kilosort_core::port::TimeProvider;

/// Shell script launcher
/// Writes the script to disk, runs it, and tees its output into the log file
pub struct ShellScriptLauncher {
    time_provider: Arc<dyn TimeProvider>,
    /// None inherits the full parent environment
    env_allowlist: Option<Vec<String>>,
    graceful_timeout: Duration,
}

impl ShellScriptLauncher {
    /// Create a new launcher that inherits the parent environment
    ///
    /// # Example
    /// ```ignore
    /// let launcher = ShellScriptLauncher::new(Arc::new(SystemTimeProvider))
    ///     .with_env_allowlist(vec!["PATH".to_string(), "HOME".to_string()]);
    /// ```
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            time_provider,
            env_allowlist: None,
            graceful_timeout: GRACEFUL_SHUTDOWN_TIMEOUT,
        }
    }

    /// Only pass these parent variables to the child (script variables always pass)
    pub fn with_env_allowlist(mut self, allowlist: Vec<String>) -> Self {
        self.env_allowlist = Some(allowlist);
        self
    }

    /// Time between SIGTERM and SIGKILL when a run times out
    pub fn with_graceful_timeout(mut self, graceful_timeout: Duration) -> Self {
        self.graceful_timeout = graceful_timeout;
        self
    }

    /// Filter environment variables to allowlist only
    fn filter_env(&self, env: &HashMap<String, String>) -> HashMap<String, String> {
        match &self.env_allowlist {
            Some(allowlist) => env
                .iter()
                .filter(|(k, _)| allowlist.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => env.clone(),
        }
    }

    /// Write the script body and make it executable
    fn write_script(&self, script: &ShellScript) -> Result<(), ExecutionError> {
        std::fs::write(&script.script_path, &script.body)
            .map_err(|e| ExecutionError::IoError(format!("writing script: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script.script_path, std::fs::Permissions::from_mode(0o755))
                .map_err(|e| ExecutionError::IoError(format!("chmod script: {}", e)))?;
        }

        debug!(script = %script.script_path.display(), "Script written");
        Ok(())
    }

    fn build_command(&self, script: &ShellScript) -> Command {
        let mut command = match script.platform {
            Platform::Unix => {
                let mut c = Command::new("bash");
                c.arg(&script.script_path);
                c
            }
            Platform::Windows => {
                let mut c = Command::new("cmd");
                c.arg("/C").arg(&script.script_path);
                c
            }
        };

        if self.env_allowlist.is_some() {
            let parent_env: HashMap<String, String> = std::env::vars().collect();
            command.env_clear().envs(self.filter_env(&parent_env));
        }

        command
            .envs(script.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&script.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so a timeout also reaches MATLAB under the shell
        #[cfg(unix)]
        command.process_group(0);

        command
    }

    /// Spawn child process and wait for it, forwarding output
    ///
    /// One deadline covers the script and the output drain: processes left in
    /// the background can keep the pipes open after the script exits.
    async fn spawn_and_wait(
        &self,
        script: &ShellScript,
    ) -> Result<(ExitStatus, Vec<String>), ExecutionError> {
        let log_file = match &script.log_path {
            Some(path) => Some(
                File::create(path)
                    .await
                    .map_err(|e| ExecutionError::IoError(format!("creating log: {}", e)))?,
            ),
            None => None,
        };

        let mut child = self
            .build_command(script)
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed(e.to_string()))?;
        // Leader pid doubles as the process group id (process_group(0))
        let pgid = child.id();
        let deadline = script.timeout.map(|limit| Instant::now() + limit);
        let timeout_ms = script.timeout.map(|t| t.as_millis() as u64).unwrap_or(0);

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);
        let mut collector = tokio::spawn(collect_output(rx, log_file, script.verbose));

        let status = match deadline {
            Some(deadline) => match timeout_at(deadline, child.wait()).await {
                Ok(status) => status.map_err(|e| ExecutionError::IoError(e.to_string()))?,
                Err(_) => {
                    warn!(timeout_ms, "Process exceeded timeout, terminating");
                    self.terminate(&mut child).await?;
                    self.finish_drain(pgid, &mut collector).await?;
                    return Err(ExecutionError::Timeout(timeout_ms));
                }
            },
            None => child
                .wait()
                .await
                .map_err(|e| ExecutionError::IoError(e.to_string()))?,
        };

        let drain_deadline = deadline.unwrap_or_else(|| Instant::now() + self.graceful_timeout);
        let tail = match timeout_at(drain_deadline, &mut collector).await {
            Ok(joined) => collected(joined)?,
            Err(_) => {
                warn!(
                    pgid = ?pgid,
                    "Output still open after the script exited, stopping leftover processes"
                );
                signal_group(pgid, GroupSignal::Term);
                let tail = self.finish_drain(pgid, &mut collector).await?;
                if script.timeout.is_some() {
                    return Err(ExecutionError::Timeout(timeout_ms));
                }
                tail
            }
        };

        Ok((status, tail))
    }

    /// Wait for the pipes to close after SIGTERM, escalating to SIGKILL
    async fn finish_drain(
        &self,
        pgid: Option<u32>,
        collector: &mut JoinHandle<std::io::Result<Vec<String>>>,
    ) -> Result<Vec<String>, ExecutionError> {
        if let Ok(joined) = timeout(self.graceful_timeout, &mut *collector).await {
            return collected(joined);
        }

        warn!(pgid = ?pgid, "Output still open after SIGTERM, sending SIGKILL");
        signal_group(pgid, GroupSignal::Kill);

        match timeout(self.graceful_timeout, &mut *collector).await {
            Ok(joined) => collected(joined),
            Err(_) => {
                // Holder left the process group
                warn!(pgid = ?pgid, "Abandoning output held open outside the process group");
                collector.abort();
                Ok(Vec::new())
            }
        }
    }

    /// Build execution result from exit status
    fn build_result(&self, status: ExitStatus, tail: Vec<String>, duration_ms: i64) -> ExecutionResult {
        let status_kind = match status.code() {
            Some(0) => ExecutionStatus::Success,
            Some(_) => ExecutionStatus::Failed,
            None => ExecutionStatus::Killed,
        };

        ExecutionResult {
            status: status_kind,
            exit_code: status.code(),
            duration_ms,
            output_tail: tail,
        }
    }

    /// Stop the process group with SIGTERM first, then SIGKILL if needed
    async fn terminate(&self, child: &mut Child) -> Result<(), ExecutionError> {
        #[cfg(unix)]
        {
            let Some(pid) = child.id() else {
                // Already reaped
                return Ok(());
            };

            // Step 1: Send SIGTERM for graceful shutdown
            info!(pid = %pid, "Sending SIGTERM to process group");
            signal_group(Some(pid), GroupSignal::Term);

            // Step 2: Wait for exit, then force kill
            match timeout(self.graceful_timeout, child.wait()).await {
                Ok(_) => {
                    info!(pid = %pid, "Process exited gracefully after SIGTERM");
                    Ok(())
                }
                Err(_) => {
                    warn!(pid = %pid, "Process did not exit after SIGTERM, sending SIGKILL");
                    signal_group(Some(pid), GroupSignal::Kill);
                    child
                        .wait()
                        .await
                        .map(|_| ())
                        .map_err(|e| ExecutionError::Killed(format!("after SIGKILL: {}", e)))
                }
            }
        }

        #[cfg(not(unix))]
        {
            info!("Killing process");
            child
                .kill()
                .await
                .map_err(|e| ExecutionError::Killed(e.to_string()))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Term,
    Kill,
}

/// Signal every process in the group; an empty group is not an error
fn signal_group(pgid: Option<u32>, signal: GroupSignal) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pgid) = pgid else {
            return;
        };
        let sig = match signal {
            GroupSignal::Term => Signal::SIGTERM,
            GroupSignal::Kill => Signal::SIGKILL,
        };
        if let Err(e) = killpg(Pid::from_raw(pgid as i32), sig) {
            debug!(pgid, signal = ?signal, error = %e, "killpg failed");
        }
    }

    #[cfg(not(unix))]
    let _ = (pgid, signal);
}

fn collected(
    joined: Result<std::io::Result<Vec<String>>, tokio::task::JoinError>,
) -> Result<Vec<String>, ExecutionError> {
    joined
        .map_err(|e| ExecutionError::IoError(format!("output collector: {}", e)))?
        .map_err(|e| ExecutionError::IoError(format!("writing log: {}", e)))
}

/// Read lines from a child pipe until EOF or the receiver goes away
async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).is_err() {
            break;
        }
    }
}

/// Drain forwarded lines into the log file and keep the last few
async fn collect_output(
    mut rx: mpsc::UnboundedReceiver<String>,
    mut log_file: Option<File>,
    verbose: bool,
) -> std::io::Result<Vec<String>> {
    let mut tail = VecDeque::with_capacity(OUTPUT_TAIL_LINES);

    while let Some(line) = rx.recv().await {
        if verbose {
            info!(target: "kilosort::matlab", "{}", line);
        }
        if let Some(file) = log_file.as_mut() {
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
        if tail.len() == OUTPUT_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    if let Some(file) = log_file.as_mut() {
        file.flush().await?;
    }
    Ok(tail.into_iter().collect())
}

fn display_log(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_default()
}

#[async_trait]
impl ProcessLauncher for ShellScriptLauncher {
    async fn launch(&self, script: &ShellScript) -> Result<ExecutionResult, ExecutionError> {
        self.write_script(script)?;

        let start_time = self.time_provider.now_millis();

        info!(
            script = %script.script_path.display(),
            working_dir = %script.working_dir.display(),
            log = %display_log(script.log_path.as_deref()),
            timeout_ms = ?script.timeout.map(|t| t.as_millis() as u64),
            "Starting script execution"
        );

        let (status, tail) = self.spawn_and_wait(script).await?;

        let duration_ms = self.time_provider.now_millis() - start_time;
        let result = self.build_result(status, tail, duration_ms);

        info!(
            script = %script.script_path.display(),
            duration_ms = %duration_ms,
            exit_code = ?result.exit_code,
            status = ?result.status,
            "Script execution completed"
        );

        Ok(result)
    }
}
