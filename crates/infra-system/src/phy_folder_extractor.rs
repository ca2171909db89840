// Phy output folder extractor
// Locates the spike files rezToPhy leaves behind and reads the plain-text metadata
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use kilosort_core::domain::{SortingOutput, Unit};
use kilosort_core::error::{AppError, Result};
use kilosort_core::port::SortingExtractor;

const SPIKE_TIMES_FILE: &str = "spike_times.npy";
const SPIKE_CLUSTERS_FILE: &str = "spike_clusters.npy";
/// Used when no manual curation produced spike_clusters.npy
const SPIKE_TEMPLATES_FILE: &str = "spike_templates.npy";
const PARAMS_FILE: &str = "params.py";

/// Label tables in order of preference: manual curation first, then Kilosort's own
const LABEL_TABLES: [&str; 3] = ["cluster_group.tsv", "cluster_groups.csv", "cluster_KSLabel.tsv"];

/// Reads a Kilosort/phy result folder
#[derive(Debug, Clone, Default)]
pub struct PhyFolderExtractor {
    exclude_groups: Vec<String>,
}

impl PhyFolderExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop units whose label is in `groups` (e.g. "noise")
    pub fn with_excluded_groups(mut self, groups: Vec<String>) -> Self {
        self.exclude_groups = groups;
        self
    }

    fn clusters_file(folder: &Path) -> Result<PathBuf> {
        [SPIKE_CLUSTERS_FILE, SPIKE_TEMPLATES_FILE]
            .iter()
            .map(|name| folder.join(name))
            .find(|path| path.is_file())
            .ok_or_else(|| {
                AppError::Extraction(format!(
                    "neither {} nor {} found in {}",
                    SPIKE_CLUSTERS_FILE,
                    SPIKE_TEMPLATES_FILE,
                    folder.display()
                ))
            })
    }

    fn read_units(&self, folder: &Path) -> Result<Vec<Unit>> {
        let Some(table) = LABEL_TABLES
            .iter()
            .map(|name| folder.join(name))
            .find(|path| path.is_file())
        else {
            warn!(folder = %folder.display(), "No cluster label table found, unit list is empty");
            return Ok(Vec::new());
        };

        let text = std::fs::read_to_string(&table)?;
        let units = parse_label_table(&text).map_err(|e| {
            AppError::Extraction(format!("{}: {}", table.display(), e))
        })?;

        debug!(table = %table.display(), units = units.len(), "Read cluster labels");

        Ok(units
            .into_iter()
            .filter(|u| match &u.label {
                Some(label) => !self.exclude_groups.contains(label),
                None => true,
            })
            .collect())
    }
}

/// Parse `cluster_id<TAB>label` rows after a header line
fn parse_label_table(text: &str) -> std::result::Result<Vec<Unit>, String> {
    text.lines()
        .skip(1)
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let mut fields = line.split('\t');
            let id = fields
                .next()
                .map(str::trim)
                .and_then(|s| s.parse::<u32>().ok())
                .ok_or_else(|| format!("line {}: invalid cluster id in '{}'", i + 2, line))?;
            let label = fields
                .next()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            Ok(Unit { id, label })
        })
        .collect()
}

/// Read `sample_rate = <value>` from phy's params.py
fn parse_sample_rate(text: &str) -> Option<f64> {
    text.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        if key.trim() != "sample_rate" {
            return None;
        }
        value.trim().parse::<f64>().ok()
    })
}

impl SortingExtractor for PhyFolderExtractor {
    fn extract(&self, folder: &Path) -> Result<SortingOutput> {
        let spike_times_path = folder.join(SPIKE_TIMES_FILE);
        if !spike_times_path.is_file() {
            return Err(AppError::Extraction(format!(
                "{} not found in {}",
                SPIKE_TIMES_FILE,
                folder.display()
            )));
        }
        let spike_clusters_path = Self::clusters_file(folder)?;

        let params_path = folder.join(PARAMS_FILE);
        let sampling_frequency = if params_path.is_file() {
            parse_sample_rate(&std::fs::read_to_string(&params_path)?)
        } else {
            None
        };
        if sampling_frequency.is_none() {
            warn!(folder = %folder.display(), "sample_rate not found in params.py");
        }

        let units = self.read_units(folder)?;

        info!(
            folder = %folder.display(),
            units = units.len(),
            sample_rate = ?sampling_frequency,
            "Sorting output collected"
        );

        Ok(SortingOutput {
            folder: folder.to_path_buf(),
            sampling_frequency,
            spike_times_path,
            spike_clusters_path,
            units,
        })
    }
}
