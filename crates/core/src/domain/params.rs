// Sorter Parameters

use serde::{Deserialize, Serialize};

use super::error::{DomainError, Result};

/// Kilosort processes data in blocks of 32 samples / filters
pub const BLOCK_SIZE: u32 = 32;

/// Batch length before the buffer is added (64 * 1024 samples)
pub const DEFAULT_BATCH_SAMPLES: u32 = 64 * 1024;

/// Filters allocated per channel when `Nfilt` is derived
pub const FILTERS_PER_CHANNEL: u32 = 8;

/// User-facing sorter parameters
///
/// Field names on the wire follow the Kilosort option names (`useGPU`,
/// `Nfilt`, `NT`) so existing parameter files load unchanged. Lowercase
/// aliases cover sources that fold key case (environment variables).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SorterParams {
    pub detect_threshold: f64,
    pub car: bool,
    #[serde(rename = "useGPU", alias = "usegpu")]
    pub use_gpu: bool,
    pub freq_min: f64,
    pub freq_max: f64,
    pub ntbuff: u32,
    #[serde(rename = "Nfilt", alias = "nfilt")]
    pub nfilt: Option<u32>,
    #[serde(rename = "NT", alias = "nt")]
    pub nt: Option<u32>,
}

impl Default for SorterParams {
    fn default() -> Self {
        Self {
            detect_threshold: 6.0,
            car: true,
            use_gpu: true,
            freq_min: 300.0,
            freq_max: 6000.0,
            ntbuff: 64,
            nfilt: None,
            nt: None,
        }
    }
}

/// Parameters after normalization against a concrete recording
///
/// `nfilt` and `nt` are always multiples of [`BLOCK_SIZE`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedParams {
    pub detect_threshold: f64,
    pub use_car: u8,
    pub use_gpu: u8,
    pub freq_min: f64,
    pub freq_max: f64,
    pub ntbuff: u32,
    pub nfilt: u32,
    pub nt: u32,
}

fn invalid(name: &str, reason: impl Into<String>) -> DomainError {
    DomainError::InvalidParameter {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn floor_to_block(value: u32) -> u32 {
    value / BLOCK_SIZE * BLOCK_SIZE
}

fn ceil_to_block(value: u32) -> Option<u32> {
    value.div_ceil(BLOCK_SIZE).checked_mul(BLOCK_SIZE)
}

impl SorterParams {
    /// Check parameter ranges that do not depend on the recording
    pub fn validate(&self) -> Result<()> {
        if !(self.detect_threshold > 0.0) {
            return Err(invalid("detect_threshold", "must be positive"));
        }
        if !(self.freq_min > 0.0) {
            return Err(invalid("freq_min", "must be positive"));
        }
        if self.freq_max <= self.freq_min {
            return Err(invalid(
                "freq_max",
                format!(
                    "must be greater than freq_min ({} <= {})",
                    self.freq_max, self.freq_min
                ),
            ));
        }
        if self.ntbuff == 0 || self.ntbuff % BLOCK_SIZE != 0 {
            return Err(invalid(
                "ntbuff",
                format!("must be a positive multiple of {}", BLOCK_SIZE),
            ));
        }
        if let Some(nt) = self.nt {
            if nt < BLOCK_SIZE {
                return Err(invalid("NT", format!("must be at least {}", BLOCK_SIZE)));
            }
        }
        Ok(())
    }

    /// Derive the concrete values written into the Kilosort config
    ///
    /// - `Nfilt` unset: `(nchan / 32) * 32 * 8`; set: rounded down to a
    ///   multiple of 32. A zero result falls back to `nchan * 8` rounded up.
    /// - `NT` unset: `64 * 1024 + ntbuff`; set: rounded down to a multiple of 32.
    pub fn resolve(&self, num_channels: usize) -> Result<ResolvedParams> {
        self.validate()?;

        if num_channels == 0 {
            return Err(DomainError::EmptyRecording);
        }
        let nchan = u32::try_from(num_channels)
            .map_err(|_| invalid("nchan", format!("too many channels: {}", num_channels)))?;

        let too_many_channels = || {
            invalid(
                "Nfilt",
                format!("cannot be derived for {} channels", num_channels),
            )
        };
        let mut nfilt = match self.nfilt {
            None => floor_to_block(nchan)
                .checked_mul(FILTERS_PER_CHANNEL)
                .ok_or_else(too_many_channels)?,
            Some(n) => floor_to_block(n),
        };
        if nfilt == 0 {
            nfilt = nchan
                .checked_mul(FILTERS_PER_CHANNEL)
                .and_then(ceil_to_block)
                .ok_or_else(too_many_channels)?;
        }

        let nt = match self.nt {
            None => DEFAULT_BATCH_SAMPLES.checked_add(self.ntbuff).ok_or_else(|| {
                invalid(
                    "ntbuff",
                    format!("too large for the default batch ({})", self.ntbuff),
                )
            })?,
            Some(n) => floor_to_block(n),
        };

        Ok(ResolvedParams {
            detect_threshold: self.detect_threshold,
            use_car: u8::from(self.car),
            use_gpu: u8::from(self.use_gpu),
            freq_min: self.freq_min,
            freq_max: self.freq_max,
            ntbuff: self.ntbuff,
            nfilt,
            nt,
        })
    }
}
