//! Shared fixtures: a fake Kilosort checkout and a fake `matlab` executable

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kilosort_core::application::constants::INSTALL_MARKER_FILE;
use kilosort_core::application::{KilosortInstallation, KilosortSorter, RunOptions};
use kilosort_core::domain::{Platform, SorterParams};
use kilosort_core::port::time_provider::SystemTimeProvider;
use kilosort_infra_system::{
    GitVersionProbe, PhyFolderExtractor, RawBinaryRecording, SampleFormat, ShellScriptLauncher,
};

pub struct Workspace {
    pub root: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Directory that passes the installation check
    pub fn kilosort_dir(&self) -> PathBuf {
        let dir = self.path().join("KiloSort");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(INSTALL_MARKER_FILE), "% preprocess\n").unwrap();
        dir
    }

    /// Executable standing in for MATLAB
    ///
    /// Records its arguments and environment, writes a minimal phy folder
    /// into the working directory, then exits with `exit_code`.
    pub fn fake_matlab(&self, exit_code: i32) -> PathBuf {
        let path = self.path().join("matlab");
        let body = format!(
            r#"#!/bin/bash
echo "MATLAB stand-in $@"
echo "$@" > matlab_args.txt
echo "$KILOSORT_PATH" > matlab_env.txt
printf 'NPY' > spike_times.npy
printf 'NPY' > spike_templates.npy
printf 'dat_path = r"recording.dat"\nn_channels_dat = 4\nsample_rate = 30000.0\n' > params.py
printf 'cluster_id\tKSLabel\n0\tgood\n1\tmua\n2\tgood\n' > cluster_KSLabel.tsv
echo "warning from stderr" >&2
exit {exit_code}
"#
        );
        std::fs::write(&path, body).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    /// Executable that never returns on its own
    pub fn hanging_matlab(&self) -> PathBuf {
        let path = self.path().join("matlab_hang");
        std::fs::write(&path, "#!/bin/bash\nsleep 30\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    /// Raw int16 recording with `num_channels` x `num_frames` samples
    pub fn recording(&self, num_channels: usize, num_frames: usize) -> RawBinaryRecording {
        let path = self.path().join("raw.bin");
        let mut bytes = Vec::with_capacity(num_channels * num_frames * 2);
        for frame in 0..num_frames {
            for channel in 0..num_channels {
                let value = (frame as i16).wrapping_mul(3).wrapping_add(channel as i16);
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        std::fs::write(&path, bytes).unwrap();
        RawBinaryRecording::open(path, num_channels, 30000.0, SampleFormat::Int16).unwrap()
    }
}

pub fn sorter(
    installation: KilosortInstallation,
    matlab: &Path,
    options: impl FnOnce(&mut RunOptions),
) -> KilosortSorter {
    let time_provider = Arc::new(SystemTimeProvider);
    let mut run_options = RunOptions {
        matlab_command: matlab.display().to_string(),
        platform: Platform::Unix,
        ..RunOptions::default()
    };
    options(&mut run_options);

    KilosortSorter::new(
        installation,
        SorterParams::default(),
        Arc::new(ShellScriptLauncher::new(time_provider.clone())),
        Arc::new(PhyFolderExtractor::new()),
        Arc::new(GitVersionProbe),
        time_provider,
    )
    .with_options(run_options)
}
