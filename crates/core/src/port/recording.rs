// Recording Port
// Multi-channel time series plus the metadata Kilosort needs

use std::path::Path;

/// Bytes per exported sample (int16)
pub const BYTES_PER_SAMPLE: usize = 2;

/// Default export chunk size in megabytes
pub const DEFAULT_CHUNK_MB: usize = 500;

/// Source of the raw data handed to the sorter
pub trait Recording: Send + Sync {
    fn num_channels(&self) -> usize;

    /// Sampling rate in Hz
    fn sampling_frequency(&self) -> f64;

    /// Per-channel coordinates, None if the recording carries no geometry
    fn channel_locations(&self) -> Option<Vec<Vec<f64>>>;

    /// Export all samples as interleaved little-endian int16 to `path`
    ///
    /// Data is written frame by frame (all channels of sample 0, then sample 1,
    /// ...), processing at most `chunk_mb` megabytes at a time.
    ///
    /// # Returns
    /// Number of bytes written
    fn write_binary_dat(&self, path: &Path, chunk_mb: usize) -> std::io::Result<u64>;
}

/// Number of frames that fit in `chunk_mb` megabytes (at least one)
pub fn frames_per_chunk(num_channels: usize, chunk_mb: usize) -> usize {
    let frame_bytes = num_channels.max(1) * BYTES_PER_SAMPLE;
    (chunk_mb.max(1) * 1024 * 1024 / frame_bytes).max(1)
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::fs::File;
    use std::io::{BufWriter, Write};

    /// Recording held entirely in memory, one trace per channel
    pub struct InMemoryRecording {
        traces: Vec<Vec<i16>>,
        sampling_frequency: f64,
        locations: Option<Vec<Vec<f64>>>,
    }

    impl InMemoryRecording {
        /// # Panics
        /// If the traces do not all have the same length
        pub fn new(traces: Vec<Vec<i16>>, sampling_frequency: f64) -> Self {
            let len = traces.first().map(Vec::len).unwrap_or(0);
            assert!(
                traces.iter().all(|t| t.len() == len),
                "all traces must have the same length"
            );
            Self {
                traces,
                sampling_frequency,
                locations: None,
            }
        }

        /// Zero-filled recording
        pub fn zeros(num_channels: usize, num_frames: usize, sampling_frequency: f64) -> Self {
            Self::new(vec![vec![0; num_frames]; num_channels], sampling_frequency)
        }

        pub fn with_locations(mut self, locations: Vec<Vec<f64>>) -> Self {
            self.locations = Some(locations);
            self
        }

        pub fn num_frames(&self) -> usize {
            self.traces.first().map(Vec::len).unwrap_or(0)
        }
    }

    impl Recording for InMemoryRecording {
        fn num_channels(&self) -> usize {
            self.traces.len()
        }

        fn sampling_frequency(&self) -> f64 {
            self.sampling_frequency
        }

        fn channel_locations(&self) -> Option<Vec<Vec<f64>>> {
            self.locations.clone()
        }

        fn write_binary_dat(&self, path: &Path, chunk_mb: usize) -> std::io::Result<u64> {
            let mut writer = BufWriter::new(File::create(path)?);
            let step = frames_per_chunk(self.num_channels(), chunk_mb);
            let mut written = 0u64;

            let mut start = 0;
            while start < self.num_frames() {
                let end = (start + step).min(self.num_frames());
                for frame in start..end {
                    for trace in &self.traces {
                        writer.write_all(&trace[frame].to_le_bytes())?;
                        written += BYTES_PER_SAMPLE as u64;
                    }
                }
                start = end;
            }

            writer.flush()?;
            Ok(written)
        }
    }
}
