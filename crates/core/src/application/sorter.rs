// Kilosort sorter - setup, launch, collect
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::constants::{
    DEFAULT_MATLAB_COMMAND, EXPORT_CHUNK_MB, MATLAB_ENTRY_POINT, PARAMS_FILE, RECORDING_FILE,
};
use super::installation::KilosortInstallation;
use super::templates::{copy_helper_scripts, RenderContext, TemplateSet};
use crate::domain::run_report::RUN_LOG_FILE;
use crate::domain::{
    Platform, ProbeGeometry, ResolvedParams, RunReport, ShellScript, SorterParams, SortingOutput,
};
use crate::error::{AppError, Result};
use crate::port::{
    ExecutionResult, ProcessLauncher, Recording, SortingExtractor, TimeProvider, VersionProbe,
};
use crate::SORTER_NAME;

/// Knobs that affect how the sorter process is run, not what it computes
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub matlab_command: String,
    pub verbose: bool,
    /// Wipe an existing output folder before setup
    pub remove_existing_folder: bool,
    pub timeout: Option<Duration>,
    pub platform: Platform,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            matlab_command: DEFAULT_MATLAB_COMMAND.to_string(),
            verbose: false,
            remove_existing_folder: false,
            timeout: None,
            platform: Platform::current(),
        }
    }
}

/// Runs Kilosort on a recording through the injected ports
pub struct KilosortSorter {
    installation: KilosortInstallation,
    params: SorterParams,
    options: RunOptions,
    launcher: Arc<dyn ProcessLauncher>,
    extractor: Arc<dyn SortingExtractor>,
    version_probe: Arc<dyn VersionProbe>,
    time_provider: Arc<dyn TimeProvider>,
}

impl KilosortSorter {
    /// Create a new sorter
    ///
    /// # Example
    /// ```ignore
    /// let sorter = KilosortSorter::new(
    ///     KilosortInstallation::from_env(),
    ///     SorterParams::default(),
    ///     Arc::new(ShellScriptLauncher::new(Arc::new(SystemTimeProvider))),
    ///     Arc::new(PhyFolderExtractor::default()),
    ///     Arc::new(GitVersionProbe),
    ///     Arc::new(SystemTimeProvider),
    /// );
    /// ```
    pub fn new(
        installation: KilosortInstallation,
        params: SorterParams,
        launcher: Arc<dyn ProcessLauncher>,
        extractor: Arc<dyn SortingExtractor>,
        version_probe: Arc<dyn VersionProbe>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            installation,
            params,
            options: RunOptions::default(),
            launcher,
            extractor,
            version_probe,
            time_provider,
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn installation(&self) -> &KilosortInstallation {
        &self.installation
    }

    pub fn params(&self) -> &SorterParams {
        &self.params
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// `git-<commit>` of the installation, `unknown` if it cannot be determined
    pub async fn sorter_version(&self) -> String {
        let Some(path) = self.installation.path() else {
            return "unknown".to_string();
        };
        match self.version_probe.revision(path).await {
            Some(commit) => format!("git-{}", commit),
            None => "unknown".to_string(),
        }
    }

    /// Write the binary data, scripts and helpers into `output_folder`
    ///
    /// # Errors
    /// - AppError::NotInstalled before anything is written
    /// - AppError::Domain for 3D geometry or invalid params
    pub fn setup_recording(
        &self,
        recording: &dyn Recording,
        output_folder: &Path,
    ) -> Result<ResolvedParams> {
        let kilosort_path = self.installation.require()?;

        let num_channels = recording.num_channels();
        let sample_rate = recording.sampling_frequency();
        if !(sample_rate > 0.0) {
            return Err(AppError::Validation(format!(
                "sampling frequency must be positive, got {}",
                sample_rate
            )));
        }

        // One group per run: every channel gets group 1
        let geometry = match recording.channel_locations() {
            Some(locations) => ProbeGeometry::from_locations(&locations, num_channels)?,
            None => {
                warn!(
                    num_channels,
                    "Recording has no channel locations, using a linear probe"
                );
                ProbeGeometry::linear(num_channels)?
            }
        };

        let resolved = self.params.resolve(num_channels)?;
        if resolved.freq_max >= sample_rate / 2.0 {
            warn!(
                freq_max = resolved.freq_max,
                nyquist = sample_rate / 2.0,
                "freq_max is at or above the Nyquist frequency"
            );
        }

        let dat_path = output_folder.join(RECORDING_FILE);
        let bytes = recording.write_binary_dat(&dat_path, EXPORT_CHUNK_MB)?;
        info!(path = %dat_path.display(), bytes, "Recording exported");

        let ctx = RenderContext {
            kilosort_path,
            output_folder,
            num_channels,
            sample_rate,
            params: &resolved,
            geometry: &geometry,
        };
        TemplateSet::render(&ctx)?.write_to(output_folder)?;
        copy_helper_scripts(output_folder)?;

        let params_doc = json!({
            "sorter_name": SORTER_NAME,
            "num_channels": num_channels,
            "sample_rate": sample_rate,
            "params": self.params,
            "resolved": resolved,
        });
        std::fs::write(
            output_folder.join(PARAMS_FILE),
            serde_json::to_string_pretty(&params_doc)?,
        )?;

        info!(
            num_channels,
            sample_rate,
            nfilt = resolved.nfilt,
            nt = resolved.nt,
            "Kilosort setup completed"
        );

        Ok(resolved)
    }

    /// Launch MATLAB on the prepared folder and wait for it
    ///
    /// # Errors
    /// - AppError::SorterFailed on a non-zero (or missing) exit code; no retry
    pub async fn run_sorter(&self, output_folder: &Path) -> Result<ExecutionResult> {
        let log_path = output_folder.join(format!("{}.log", SORTER_NAME));
        let mut script = ShellScript::matlab(
            self.options.platform,
            output_folder,
            &self.options.matlab_command,
            MATLAB_ENTRY_POINT,
            &format!("run_{}", SORTER_NAME),
        )
        .with_log_path(&log_path)
        .with_timeout(self.options.timeout)
        .with_verbose(self.options.verbose);

        if let Some((key, value)) = self.installation.env_var() {
            script = script.with_env(key, value);
        }

        info!(
            script = %script.script_path.display(),
            matlab = %self.options.matlab_command,
            "Launching Kilosort"
        );

        let result = self.launcher.launch(&script).await?;

        if !result.is_success() {
            error!(
                exit_code = ?result.exit_code,
                status = ?result.status,
                tail = %result.output_tail.join("\n"),
                "Kilosort failed"
            );
            return Err(AppError::SorterFailed {
                exit_code: result.exit_code,
                log_path,
            });
        }

        info!(duration_ms = result.duration_ms, "Kilosort finished");
        Ok(result)
    }

    /// Read the sorter output left in `output_folder`
    pub fn get_result(&self, output_folder: &Path) -> Result<SortingOutput> {
        self.extractor.extract(output_folder)
    }

    /// Full pipeline: prepare folder, setup, run, record, collect
    ///
    /// Setup and result collection use blocking file I/O (the recording export
    /// streams up to `EXPORT_CHUNK_MB` per write) on the calling task. One run
    /// owns its runtime thread for that time; callers running other tasks on
    /// the same runtime should call this from a dedicated thread.
    pub async fn run(&self, recording: &dyn Recording, output_folder: &Path) -> Result<SortingOutput> {
        // Fail fast: nothing is created without an installation
        self.installation.require()?;

        let folder = self.prepare_output_folder(output_folder)?;
        let version = self.sorter_version().await;
        let started_at = self.time_provider.now_millis();

        info!(
            folder = %folder.display(),
            version = %version,
            "Starting Kilosort run"
        );

        let outcome = match self.setup_recording(recording, &folder) {
            Ok(_) => self.run_sorter(&folder).await.map(|_| ()),
            Err(e) => Err(e),
        };

        let duration_ms = self.time_provider.now_millis() - started_at;
        let report = match &outcome {
            Ok(()) => RunReport::success(SORTER_NAME, &version, started_at, duration_ms),
            Err(e) => RunReport::failure(SORTER_NAME, &version, started_at, duration_ms, e.to_string()),
        };

        match (outcome, self.write_run_report(&folder, &report)) {
            (Err(e), report_result) => {
                if let Err(report_err) = report_result {
                    warn!(error = %report_err, "Could not write run report");
                }
                Err(e)
            }
            (Ok(()), Err(report_err)) => Err(report_err),
            (Ok(()), Ok(())) => {
                info!(run_time_secs = report.run_time_secs, "Kilosort run completed");
                self.get_result(&folder)
            }
        }
    }

    fn prepare_output_folder(&self, output_folder: &Path) -> Result<PathBuf> {
        let folder = if output_folder.is_absolute() {
            output_folder.to_path_buf()
        } else {
            std::env::current_dir()?.join(output_folder)
        };

        if folder.exists() && self.options.remove_existing_folder {
            info!(folder = %folder.display(), "Removing existing output folder");
            std::fs::remove_dir_all(&folder)?;
        }
        std::fs::create_dir_all(&folder)?;

        Ok(folder)
    }

    fn write_run_report(&self, folder: &Path, report: &RunReport) -> Result<()> {
        let text = serde_json::to_string_pretty(report)?;
        std::fs::write(folder.join(RUN_LOG_FILE), text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::constants::{
        CHANNEL_MAP_SCRIPT, CONFIG_SCRIPT, INSTALL_MARKER_FILE, KILOSORT_PATH_ENV, MASTER_SCRIPT,
    };
    use crate::domain::{DomainError, Unit};
    use crate::port::process_launcher::mocks::{MockBehavior, MockProcessLauncher};
    use crate::port::recording::mocks::InMemoryRecording;
    use crate::port::sorting_extractor::mocks::MockSortingExtractor;
    use crate::port::time_provider::mocks::SteppingTimeProvider;
    use crate::port::version_probe::mocks::FixedVersionProbe;
    use crate::port::ExecutionError;

    struct Fixture {
        install_dir: tempfile::TempDir,
        work_dir: tempfile::TempDir,
        launcher: Arc<MockProcessLauncher>,
        extractor: Arc<MockSortingExtractor>,
    }

    impl Fixture {
        fn new(launcher: MockProcessLauncher) -> Self {
            let install_dir = tempfile::tempdir().unwrap();
            std::fs::write(install_dir.path().join(INSTALL_MARKER_FILE), "").unwrap();
            Self {
                install_dir,
                work_dir: tempfile::tempdir().unwrap(),
                launcher: Arc::new(launcher),
                extractor: Arc::new(MockSortingExtractor::new(vec![Unit {
                    id: 0,
                    label: Some("good".to_string()),
                }])),
            }
        }

        fn sorter(&self) -> KilosortSorter {
            self.sorter_with(KilosortInstallation::with_path(
                self.install_dir.path().to_str().unwrap(),
            ))
        }

        fn sorter_with(&self, installation: KilosortInstallation) -> KilosortSorter {
            KilosortSorter::new(
                installation,
                SorterParams::default(),
                self.launcher.clone(),
                self.extractor.clone(),
                Arc::new(FixedVersionProbe(Some("abc123".to_string()))),
                Arc::new(SteppingTimeProvider::new(1_000, 500)),
            )
            .with_options(RunOptions {
                platform: Platform::Unix,
                ..Default::default()
            })
        }

        fn output(&self) -> PathBuf {
            self.work_dir.path().join("ks_output")
        }
    }

    fn recording_2d() -> InMemoryRecording {
        InMemoryRecording::zeros(4, 100, 30000.0).with_locations(vec![
            vec![0.0, 0.0],
            vec![0.0, 20.0],
            vec![0.0, 40.0],
            vec![0.0, 60.0],
        ])
    }

    fn read_report(folder: &Path) -> RunReport {
        let text = std::fs::read_to_string(folder.join(RUN_LOG_FILE)).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_run_success() {
        let fixture = Fixture::new(MockProcessLauncher::new_success());
        let sorter = fixture.sorter();

        let sorting = sorter.run(&recording_2d(), &fixture.output()).await.unwrap();

        assert_eq!(sorting.unit_ids(), vec![0]);
        assert_eq!(fixture.launcher.call_count(), 1);
        assert_eq!(fixture.extractor.call_count(), 1);

        let out = fixture.output();
        for name in [RECORDING_FILE, MASTER_SCRIPT, CONFIG_SCRIPT, CHANNEL_MAP_SCRIPT, PARAMS_FILE] {
            assert!(out.join(name).is_file(), "{} missing", name);
        }
        // 4 channels * 100 frames * 2 bytes
        assert_eq!(std::fs::metadata(out.join(RECORDING_FILE)).unwrap().len(), 800);

        let report = read_report(&out);
        assert!(!report.error);
        assert_eq!(report.sorter_version, "git-abc123");
        assert_eq!(report.run_time_secs, 0.5);
    }

    #[tokio::test]
    async fn test_launched_script_exports_install_path() {
        let fixture = Fixture::new(MockProcessLauncher::new_success());
        let sorter = fixture.sorter();

        sorter.run(&recording_2d(), &fixture.output()).await.unwrap();

        let scripts = fixture.launcher.launched_scripts();
        let script = &scripts[0];
        let install = sorter.installation().path().unwrap().display().to_string();
        assert!(script
            .env
            .contains(&(KILOSORT_PATH_ENV.to_string(), install)));
        assert_eq!(script.working_dir, fixture.output());
        assert_eq!(script.log_path, Some(fixture.output().join("kilosort.log")));
        assert!(script.body.contains("-r kilosort_master"));
    }

    #[tokio::test]
    async fn test_not_installed_fails_before_any_work() {
        let fixture = Fixture::new(MockProcessLauncher::new_success());
        let sorter = fixture.sorter_with(KilosortInstallation::default());

        let result = sorter.run(&recording_2d(), &fixture.output()).await;

        assert!(matches!(result, Err(AppError::NotInstalled(_))));
        assert!(!fixture.output().exists());
        assert_eq!(fixture.launcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_three_dimensional_geometry_rejected() {
        let fixture = Fixture::new(MockProcessLauncher::new_success());
        let sorter = fixture.sorter();
        let recording = InMemoryRecording::zeros(2, 10, 30000.0)
            .with_locations(vec![vec![0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);

        let result = sorter.run(&recording, &fixture.output()).await;

        assert!(matches!(
            result,
            Err(AppError::Domain(DomainError::UnsupportedGeometry { .. }))
        ));
        assert_eq!(fixture.launcher.call_count(), 0);
        assert!(!fixture.output().join(RECORDING_FILE).exists());

        let report = read_report(&fixture.output());
        assert!(report.error);
        assert!(report.error_message.unwrap().contains("3D"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_fatal() {
        let fixture = Fixture::new(MockProcessLauncher::new_exit(1));
        let sorter = fixture.sorter();

        let result = sorter.run(&recording_2d(), &fixture.output()).await;

        match result {
            Err(AppError::SorterFailed { exit_code, log_path }) => {
                assert_eq!(exit_code, Some(1));
                assert!(log_path.ends_with("kilosort.log"));
            }
            other => panic!("expected SorterFailed, got {:?}", other),
        }
        assert_eq!(fixture.launcher.call_count(), 1, "no retry");
        assert_eq!(fixture.extractor.call_count(), 0);
        assert!(read_report(&fixture.output()).error);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_recorded() {
        let fixture = Fixture::new(MockProcessLauncher::new(MockBehavior::Fail(
            "matlab: command not found".to_string(),
        )));
        let sorter = fixture.sorter();

        let err = sorter
            .run(&recording_2d(), &fixture.output())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Execution(ExecutionError::SpawnFailed(_))
        ));
        assert_eq!(fixture.launcher.call_count(), 1);
        assert_eq!(fixture.extractor.call_count(), 0);

        let report = read_report(&fixture.output());
        assert!(report.error);
        assert!(report
            .error_message
            .as_deref()
            .unwrap()
            .contains("command not found"));
    }

    #[tokio::test]
    async fn test_timeout_propagates() {
        let fixture = Fixture::new(MockProcessLauncher::new(MockBehavior::Timeout(50)));
        let sorter = fixture.sorter();

        let result = sorter.run(&recording_2d(), &fixture.output()).await;

        assert!(matches!(
            result,
            Err(AppError::Execution(ExecutionError::Timeout(50)))
        ));
    }

    #[tokio::test]
    async fn test_missing_locations_use_linear_probe() {
        let fixture = Fixture::new(MockProcessLauncher::new_success());
        let sorter = fixture.sorter();
        let recording = InMemoryRecording::zeros(3, 10, 20000.0);

        sorter.run(&recording, &fixture.output()).await.unwrap();

        let channel_map =
            std::fs::read_to_string(fixture.output().join(CHANNEL_MAP_SCRIPT)).unwrap();
        assert!(channel_map.contains("ycoords   = [0, 1, 2]';"));
    }

    #[tokio::test]
    async fn test_remove_existing_folder() {
        let fixture = Fixture::new(MockProcessLauncher::new_success());
        std::fs::create_dir_all(fixture.output()).unwrap();
        std::fs::write(fixture.output().join("stale.txt"), "old").unwrap();

        let sorter = fixture.sorter().with_options(RunOptions {
            remove_existing_folder: true,
            platform: Platform::Unix,
            ..Default::default()
        });
        sorter.run(&recording_2d(), &fixture.output()).await.unwrap();

        assert!(!fixture.output().join("stale.txt").exists());
    }

    #[tokio::test]
    async fn test_sorter_version_unknown() {
        let fixture = Fixture::new(MockProcessLauncher::new_success());
        let sorter = KilosortSorter::new(
            KilosortInstallation::default(),
            SorterParams::default(),
            fixture.launcher.clone(),
            fixture.extractor.clone(),
            Arc::new(FixedVersionProbe(None)),
            Arc::new(SteppingTimeProvider::new(0, 1)),
        );
        assert_eq!(sorter.sorter_version().await, "unknown");
    }

    #[test]
    fn test_sorter_version_prefixes_revision() {
        let fixture = Fixture::new(MockProcessLauncher::new_success());
        let version = tokio_test::block_on(fixture.sorter().sorter_version());
        assert_eq!(version, "git-abc123");
    }

    #[test]
    fn test_setup_writes_resolved_params() {
        let fixture = Fixture::new(MockProcessLauncher::new_success());
        let sorter = fixture.sorter();
        std::fs::create_dir_all(fixture.output()).unwrap();

        let resolved = sorter
            .setup_recording(&recording_2d(), &fixture.output())
            .unwrap();
        assert_eq!(resolved.nfilt, 32);

        let text = std::fs::read_to_string(fixture.output().join(PARAMS_FILE)).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["resolved"]["nfilt"], 32);
        assert_eq!(doc["params"]["useGPU"], true);
        assert_eq!(doc["num_channels"], 4);
    }

    #[test]
    fn test_setup_rejects_zero_sampling_frequency() {
        let fixture = Fixture::new(MockProcessLauncher::new_success());
        std::fs::create_dir_all(fixture.output()).unwrap();

        let result = fixture
            .sorter()
            .setup_recording(&InMemoryRecording::zeros(4, 10, 0.0), &fixture.output());

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(!fixture.output().join(RECORDING_FILE).exists());
    }
}
