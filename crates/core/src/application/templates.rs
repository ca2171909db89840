// MATLAB script templates
// `{name}` placeholders are substituted with strfmt; literal braces must be doubled

use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use super::constants::{CHANNEL_MAP_SCRIPT, CONFIG_SCRIPT, MASTER_SCRIPT, RECORDING_FILE};
use crate::domain::{ProbeGeometry, ResolvedParams};
use crate::error::{AppError, Result};

const MASTER_TEMPLATE: &str = include_str!("../../templates/kilosort_master.m");
const CONFIG_TEMPLATE: &str = include_str!("../../templates/kilosort_config.m");
const CHANNEL_MAP_TEMPLATE: &str = include_str!("../../templates/kilosort_channelmap.m");

/// Helper functions used by `rezToPhy`, copied unchanged
const HELPER_SCRIPTS: [(&str, &str); 2] = [
    ("writeNPY.m", include_str!("../../templates/writeNPY.m")),
    (
        "constructNPYheader.m",
        include_str!("../../templates/constructNPYheader.m"),
    ),
];

/// Everything the templates need from one run
pub struct RenderContext<'a> {
    pub kilosort_path: &'a Path,
    pub output_folder: &'a Path,
    pub num_channels: usize,
    pub sample_rate: f64,
    pub params: &'a ResolvedParams,
    pub geometry: &'a ProbeGeometry,
}

/// The three rendered scripts
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateSet {
    pub master: String,
    pub config: String,
    pub channel_map: String,
}

/// Quote a path for use inside a single-quoted MATLAB string
fn matlab_path(path: &Path) -> String {
    path.display().to_string().replace('\'', "''")
}

fn render(name: &str, template: &str, vars: &HashMap<String, String>) -> Result<String> {
    strfmt::strfmt(template, vars).map_err(|e| AppError::Template(format!("{}: {}", name, e)))
}

fn vars<const N: usize>(pairs: [(&str, String); N]) -> HashMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

impl TemplateSet {
    /// Substitute run values into all three templates
    ///
    /// # Errors
    /// - AppError::Template if a placeholder has no value
    pub fn render(ctx: &RenderContext<'_>) -> Result<Self> {
        let folder = ctx.output_folder;
        let p = ctx.params;

        let master = render(
            MASTER_SCRIPT,
            MASTER_TEMPLATE,
            &vars([
                ("kilosort_path", matlab_path(ctx.kilosort_path)),
                ("output_folder", matlab_path(folder)),
                ("channel_path", matlab_path(&folder.join(CHANNEL_MAP_SCRIPT))),
                ("config_path", matlab_path(&folder.join(CONFIG_SCRIPT))),
                ("useGPU", p.use_gpu.to_string()),
            ]),
        )?;

        let config = render(
            CONFIG_SCRIPT,
            CONFIG_TEMPLATE,
            &vars([
                ("nchanTOT", ctx.num_channels.to_string()),
                ("nchan", ctx.num_channels.to_string()),
                ("sample_rate", ctx.sample_rate.to_string()),
                ("dat_file", matlab_path(&folder.join(RECORDING_FILE))),
                ("Nfilt", p.nfilt.to_string()),
                ("ntbuff", p.ntbuff.to_string()),
                ("NT", p.nt.to_string()),
                ("kilo_thresh", p.detect_threshold.to_string()),
                ("use_car", p.use_car.to_string()),
                ("freq_min", p.freq_min.to_string()),
                ("freq_max", p.freq_max.to_string()),
            ]),
        )?;

        let channel_map = render(
            CHANNEL_MAP_SCRIPT,
            CHANNEL_MAP_TEMPLATE,
            &vars([
                ("nchan", ctx.num_channels.to_string()),
                ("sample_rate", ctx.sample_rate.to_string()),
                ("xcoords", ctx.geometry.xcoords()),
                ("ycoords", ctx.geometry.ycoords()),
                ("kcoords", ctx.geometry.kcoords()),
            ]),
        )?;

        Ok(Self {
            master,
            config,
            channel_map,
        })
    }

    /// Write the scripts into `folder` under their fixed names
    pub fn write_to(&self, folder: &Path) -> Result<()> {
        for (name, text) in [
            (MASTER_SCRIPT, &self.master),
            (CONFIG_SCRIPT, &self.config),
            (CHANNEL_MAP_SCRIPT, &self.channel_map),
        ] {
            std::fs::write(folder.join(name), text)?;
            debug!(script = name, folder = %folder.display(), "Wrote MATLAB script");
        }
        Ok(())
    }
}

/// Copy the `.npy` writer helpers next to the generated scripts
pub fn copy_helper_scripts(folder: &Path) -> Result<()> {
    for (name, text) in HELPER_SCRIPTS {
        std::fs::write(folder.join(name), text)?;
    }
    Ok(())
}
