// Probe Geometry (channel map)

use super::error::{DomainError, Result};

/// Group id assigned to every channel (one group per run)
pub const DEFAULT_CHANNEL_GROUP: u32 = 1;

/// 2D position of one recording channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelLocation {
    pub x: f64,
    pub y: f64,
}

/// Channel map handed to Kilosort
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeGeometry {
    locations: Vec<ChannelLocation>,
    groups: Vec<u32>,
}

impl ProbeGeometry {
    /// Build from raw per-channel coordinates
    ///
    /// Every location must have exactly two coordinates; 3D probes are rejected.
    pub fn from_locations(locations: &[Vec<f64>], num_channels: usize) -> Result<Self> {
        if num_channels == 0 {
            return Err(DomainError::EmptyRecording);
        }
        if locations.len() != num_channels {
            return Err(DomainError::ChannelCountMismatch {
                expected: num_channels,
                actual: locations.len(),
            });
        }

        let locations = locations
            .iter()
            .enumerate()
            .map(|(channel, coords)| match coords.as_slice() {
                [x, y] => Ok(ChannelLocation { x: *x, y: *y }),
                other => Err(DomainError::UnsupportedGeometry {
                    channel,
                    dims: other.len(),
                }),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            groups: vec![DEFAULT_CHANNEL_GROUP; locations.len()],
            locations,
        })
    }

    /// Linear probe at `(0, i)`, used when a recording carries no locations
    pub fn linear(num_channels: usize) -> Result<Self> {
        let locations: Vec<Vec<f64>> = (0..num_channels).map(|i| vec![0.0, i as f64]).collect();
        Self::from_locations(&locations, num_channels)
    }

    pub fn num_channels(&self) -> usize {
        self.locations.len()
    }

    pub fn locations(&self) -> &[ChannelLocation] {
        &self.locations
    }

    /// MATLAB row vector of x coordinates
    pub fn xcoords(&self) -> String {
        matlab_row(self.locations.iter().map(|l| l.x))
    }

    /// MATLAB row vector of y coordinates
    pub fn ycoords(&self) -> String {
        matlab_row(self.locations.iter().map(|l| l.y))
    }

    /// MATLAB row vector of channel groups
    pub fn kcoords(&self) -> String {
        matlab_row(self.groups.iter())
    }
}

fn matlab_row<T: std::fmt::Display>(values: impl Iterator<Item = T>) -> String {
    let items: Vec<String> = values.map(|v| v.to_string()).collect();
    format!("[{}]", items.join(", "))
}
