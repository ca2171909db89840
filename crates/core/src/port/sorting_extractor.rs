// Sorting Extractor Port
// Reads a finished output folder into a SortingOutput

use std::path::Path;

use crate::domain::SortingOutput;
use crate::error::Result;

pub trait SortingExtractor: Send + Sync {
    /// Collect the sorter results found in `folder`
    ///
    /// # Errors
    /// - AppError::Extraction if required result files are missing or malformed
    fn extract(&self, folder: &Path) -> Result<SortingOutput>;
}

pub mod mocks {
    use super::*;
    use crate::domain::Unit;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed unit list rooted at the requested folder
    pub struct MockSortingExtractor {
        units: Vec<Unit>,
        call_count: AtomicUsize,
    }

    impl MockSortingExtractor {
        pub fn new(units: Vec<Unit>) -> Self {
            Self {
                units,
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    impl SortingExtractor for MockSortingExtractor {
        fn extract(&self, folder: &Path) -> Result<SortingOutput> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Ok(SortingOutput {
                folder: folder.to_path_buf(),
                sampling_frequency: None,
                spike_times_path: folder.join("spike_times.npy"),
                spike_clusters_path: folder.join("spike_clusters.npy"),
                units: self.units.clone(),
            })
        }
    }
}
