//! Kilosort Runner - Command-line entry point
//! Composition root: wires the infra adapters into the core sorter

mod config;
mod logging;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tabled::{Table, Tabled};
use tracing::info;

use kilosort_core::application::{installation_message, KilosortInstallation, KilosortSorter};
use kilosort_core::domain::{SorterParams, SortingOutput};
use kilosort_core::port::time_provider::SystemTimeProvider;
use kilosort_core::port::ProcessLauncher;
use kilosort_infra_system::{
    GitVersionProbe, PhyFolderExtractor, RawBinaryRecording, SampleFormat, ShellScriptLauncher,
};

use crate::config::RunnerConfig;

#[derive(Parser)]
#[command(name = "kilosort-runner")]
#[command(about = "Prepare, launch and collect Kilosort spike-sorting runs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Kilosort installation directory
    #[arg(long, global = true, env = "KILOSORT_PATH")]
    kilosort_path: Option<String>,

    /// MATLAB executable
    #[arg(long, global = true)]
    matlab: Option<String>,

    /// Log format (pretty, json)
    #[arg(long, global = true, env = "KILOSORT_LOG_FORMAT")]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that Kilosort is installed
    Check,

    /// Show runner and Kilosort versions
    Version,

    /// Show effective parameters
    Params {
        /// Also show values resolved for this channel count
        #[arg(long)]
        channels: Option<usize>,
    },

    /// Write binary data and MATLAB scripts without launching
    Setup(RecordingArgs),

    /// Full run: setup, launch MATLAB, collect results
    Run {
        #[command(flatten)]
        recording: RecordingArgs,

        /// Abort after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Echo MATLAB output while it runs
        #[arg(short, long)]
        verbose: bool,

        /// Delete the output folder first if it exists
        #[arg(long)]
        remove_existing: bool,
    },

    /// Collect results from a finished output folder
    Result {
        /// Output folder of a previous run
        output: PathBuf,
    },
}

#[derive(Args)]
struct RecordingArgs {
    /// Raw interleaved binary file
    #[arg(long)]
    recording: PathBuf,

    /// Number of channels in the raw file
    #[arg(long)]
    num_channels: usize,

    /// Sampling rate in Hz
    #[arg(long)]
    sample_rate: f64,

    /// Sample type of the raw file (int16, float32)
    #[arg(long, default_value = "int16")]
    dtype: SampleFormat,

    /// JSON probe file with 2D channel locations
    #[arg(long)]
    probe: Option<PathBuf>,

    /// Output folder
    #[arg(short, long)]
    output: PathBuf,

    /// Sorter parameters as JSON (merged over configured params)
    #[arg(long)]
    params: Option<String>,
}

#[derive(Tabled)]
struct ParamRow {
    name: String,
    value: String,
}

#[derive(Tabled)]
struct UnitRow {
    unit_id: u32,
    label: String,
}

impl RecordingArgs {
    fn open(&self) -> Result<RawBinaryRecording> {
        let recording = RawBinaryRecording::open(
            &self.recording,
            self.num_channels,
            self.sample_rate,
            self.dtype,
        )
        .with_context(|| format!("Failed to open recording {}", self.recording.display()))?;

        match &self.probe {
            Some(probe) => recording
                .with_probe_file(probe)
                .with_context(|| format!("Failed to read probe file {}", probe.display())),
            None => Ok(recording),
        }
    }
}

/// Overlay a JSON object of params on top of `base`
fn merge_params(base: &SorterParams, overrides: Option<&str>) -> Result<SorterParams> {
    let Some(text) = overrides else {
        return Ok(base.clone());
    };
    let patch: serde_json::Value = serde_json::from_str(text).context("Invalid params JSON")?;
    let serde_json::Value::Object(patch) = patch else {
        anyhow::bail!("params must be a JSON object");
    };

    let mut merged = serde_json::to_value(base)?;
    if let serde_json::Value::Object(map) = &mut merged {
        map.extend(patch);
    }
    serde_json::from_value(merged).context("Invalid sorter parameters")
}

fn build_sorter(config: &RunnerConfig, params: SorterParams) -> KilosortSorter {
    let installation = match &config.kilosort_path {
        Some(path) => KilosortInstallation::with_path(path),
        None => KilosortInstallation::from_env(),
    };

    let time_provider = Arc::new(SystemTimeProvider);
    let mut launcher = ShellScriptLauncher::new(time_provider.clone());
    if let Some(allowlist) = &config.env_allowlist {
        launcher = launcher.with_env_allowlist(allowlist.clone());
    }
    let launcher: Arc<dyn ProcessLauncher> = Arc::new(launcher);

    let extractor =
        PhyFolderExtractor::new().with_excluded_groups(config.exclude_groups.clone());

    KilosortSorter::new(
        installation,
        params,
        launcher,
        Arc::new(extractor),
        Arc::new(GitVersionProbe),
        time_provider,
    )
    .with_options(config.run_options())
}

fn print_params(params: &SorterParams, channels: Option<usize>) -> Result<()> {
    let value = serde_json::to_value(params)?;
    let mut rows: Vec<ParamRow> = value
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(name, value)| ParamRow {
                    name: name.clone(),
                    value: value.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    if let Some(nchan) = channels {
        let resolved = params.resolve(nchan)?;
        rows.push(ParamRow {
            name: format!("Nfilt (resolved, {} ch)", nchan),
            value: resolved.nfilt.to_string(),
        });
        rows.push(ParamRow {
            name: format!("NT (resolved, {} ch)", nchan),
            value: resolved.nt.to_string(),
        });
    }

    println!("{}", Table::new(rows));
    Ok(())
}

fn print_sorting(sorting: &SortingOutput) {
    println!("{}", "✓ Sorting collected".green().bold());
    println!();
    println!("  {} {}", "Folder:".bold(), sorting.folder.display());
    match sorting.sampling_frequency {
        Some(fs) => println!("  {} {} Hz", "Sample rate:".bold(), fs),
        None => println!("  {} {}", "Sample rate:".bold(), "unknown".yellow()),
    }
    println!("  {} {}", "Spike times:".bold(), sorting.spike_times_path.display());
    println!("  {} {}", "Spike clusters:".bold(), sorting.spike_clusters_path.display());
    println!("  {} {}", "Units:".bold(), sorting.num_units());
    println!();

    if !sorting.units.is_empty() {
        let rows: Vec<UnitRow> = sorting
            .units
            .iter()
            .map(|u| UnitRow {
                unit_id: u.id,
                label: u.label.clone().unwrap_or_else(|| "-".to_string()),
            })
            .collect();
        println!("{}", Table::new(rows));
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // 1. Load configuration, then apply flags
    let mut config = config::load(cli.config.as_deref())?;
    if let Some(path) = cli.kilosort_path {
        config.kilosort_path = Some(path);
    }
    if let Some(matlab) = cli.matlab {
        config.matlab_command = matlab;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }

    // 2. Initialize logging (guard flushes the log file on drop)
    let log_dir = config.log_dir();
    let _log_guard = logging::init_logging(&config.log_format, log_dir.as_deref())?;

    info!("Kilosort runner v{} starting", kilosort_core::VERSION);

    match cli.command {
        Commands::Check => {
            let sorter = build_sorter(&config, config.params.clone());
            match sorter.installation().path() {
                Some(path) if sorter.installation().is_installed() => {
                    println!(
                        "{} {}",
                        "✓ Kilosort installed at".green().bold(),
                        path.display()
                    );
                }
                _ => {
                    println!("{}", "✗ Kilosort not found".red().bold());
                    println!("{}", installation_message());
                    return Ok(ExitCode::FAILURE);
                }
            }
        }

        Commands::Version => {
            let sorter = build_sorter(&config, config.params.clone());
            println!("  {} {}", "Runner:".bold(), kilosort_core::VERSION);
            println!("  {} {}", "Kilosort:".bold(), sorter.sorter_version().await);
        }

        Commands::Params { channels } => {
            print_params(&config.params, channels)?;
        }

        Commands::Setup(args) => {
            let params = merge_params(&config.params, args.params.as_deref())?;
            let sorter = build_sorter(&config, params);
            let recording = args.open()?;

            let output = absolute(&args.output)?;
            std::fs::create_dir_all(&output)
                .with_context(|| format!("Failed to create {}", output.display()))?;
            let resolved = sorter.setup_recording(&recording, &output)?;

            println!("{}", "✓ Setup written".green().bold());
            println!("  {} {}", "Folder:".bold(), output.display());
            println!("  {} {}", "Nfilt:".bold(), resolved.nfilt);
            println!("  {} {}", "NT:".bold(), resolved.nt);
        }

        Commands::Run {
            recording,
            timeout_secs,
            verbose,
            remove_existing,
        } => {
            if timeout_secs.is_some() {
                config.timeout_secs = timeout_secs;
            }
            config.verbose |= verbose;
            config.remove_existing_folder |= remove_existing;

            let params = merge_params(&config.params, recording.params.as_deref())?;
            let sorter = build_sorter(&config, params);
            let source = recording.open()?;

            println!("{}", "Running Kilosort...".cyan().bold());
            let sorting = sorter.run(&source, &recording.output).await?;
            print_sorting(&sorting);
        }

        Commands::Result { output } => {
            let sorter = build_sorter(&config, config.params.clone());
            let sorting = sorter.get_result(&absolute(&output)?)?;
            print_sorting(&sorting);
        }
    }

    Ok(ExitCode::SUCCESS)
}
