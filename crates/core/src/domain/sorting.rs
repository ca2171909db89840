// Sorting Output (what the extractor hands back)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One sorted unit as listed by the curation tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: u32,
    /// Curation label, e.g. "good", "mua", "noise"
    pub label: Option<String>,
}

/// Location and metadata of a finished sort
///
/// Spike payloads stay on disk; consumers open `spike_times_path` and
/// `spike_clusters_path` with their own `.npy` reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortingOutput {
    pub folder: PathBuf,
    pub sampling_frequency: Option<f64>,
    pub spike_times_path: PathBuf,
    pub spike_clusters_path: PathBuf,
    pub units: Vec<Unit>,
}

impl SortingOutput {
    pub fn unit_ids(&self) -> Vec<u32> {
        self.units.iter().map(|u| u.id).collect()
    }

    pub fn num_units(&self) -> usize {
        self.units.len()
    }

    /// Units carrying the given curation label
    pub fn units_labeled<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a Unit> + 'a {
        self.units
            .iter()
            .filter(move |u| u.label.as_deref() == Some(label))
    }
}
