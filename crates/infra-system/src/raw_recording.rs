// Raw binary recording (interleaved samples on disk)
use serde::Deserialize;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use kilosort_core::port::recording::{frames_per_chunk, Recording, BYTES_PER_SAMPLE};

/// On-disk sample type of the source file (little-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Int16,
    Float32,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::Int16 => 2,
            SampleFormat::Float32 => 4,
        }
    }
}

impl std::str::FromStr for SampleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int16" | "i16" => Ok(SampleFormat::Int16),
            "float32" | "f32" => Ok(SampleFormat::Float32),
            other => Err(format!("unsupported sample format '{}' (int16, float32)", other)),
        }
    }
}

/// Probe description file: either `{"channel_locations": [[x, y], ...]}` or a bare list
#[derive(Deserialize)]
#[serde(untagged)]
enum ProbeFile {
    Object { channel_locations: Vec<Vec<f64>> },
    List(Vec<Vec<f64>>),
}

/// Frame-interleaved recording stored in a flat binary file
#[derive(Debug, Clone)]
pub struct RawBinaryRecording {
    path: PathBuf,
    num_channels: usize,
    sampling_frequency: f64,
    format: SampleFormat,
    num_frames: usize,
    locations: Option<Vec<Vec<f64>>>,
}

impl RawBinaryRecording {
    /// Open an existing file
    ///
    /// # Errors
    /// - InvalidInput if `num_channels` is zero
    /// - InvalidData if the file size is not a whole number of frames
    pub fn open(
        path: impl Into<PathBuf>,
        num_channels: usize,
        sampling_frequency: f64,
        format: SampleFormat,
    ) -> io::Result<Self> {
        let path = path.into();
        if num_channels == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "num_channels must be positive",
            ));
        }

        let len = std::fs::metadata(&path)?.len() as usize;
        let frame_bytes = num_channels * format.bytes_per_sample();
        if len % frame_bytes != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} has {} bytes, not a multiple of the {}-byte frame",
                    path.display(),
                    len,
                    frame_bytes
                ),
            ));
        }

        debug!(path = %path.display(), num_channels, frames = len / frame_bytes, "Opened raw recording");

        Ok(Self {
            path,
            num_channels,
            sampling_frequency,
            format,
            num_frames: len / frame_bytes,
            locations: None,
        })
    }

    pub fn with_locations(mut self, locations: Vec<Vec<f64>>) -> Self {
        self.locations = Some(locations);
        self
    }

    /// Load channel locations from a JSON probe file
    pub fn with_probe_file(self, probe_path: &Path) -> io::Result<Self> {
        let text = std::fs::read_to_string(probe_path)?;
        let probe: ProbeFile = serde_json::from_str(&text)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let locations = match probe {
            ProbeFile::Object { channel_locations } => channel_locations,
            ProbeFile::List(list) => list,
        };
        Ok(self.with_locations(locations))
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn convert_chunk(format: SampleFormat, raw: &[u8], out: &mut Vec<u8>) {
    out.clear();
    match format {
        SampleFormat::Int16 => out.extend_from_slice(raw),
        SampleFormat::Float32 => {
            for bytes in raw.chunks_exact(4) {
                let value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                let sample = value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                out.extend_from_slice(&sample.to_le_bytes());
            }
        }
    }
}

impl Recording for RawBinaryRecording {
    fn num_channels(&self) -> usize {
        self.num_channels
    }

    fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    fn channel_locations(&self) -> Option<Vec<Vec<f64>>> {
        self.locations.clone()
    }

    fn write_binary_dat(&self, path: &Path, chunk_mb: usize) -> io::Result<u64> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut writer = BufWriter::new(File::create(path)?);

        let frames = frames_per_chunk(self.num_channels, chunk_mb);
        let in_frame_bytes = self.num_channels * self.format.bytes_per_sample();
        let mut raw = vec![0u8; frames * in_frame_bytes];
        let mut converted = Vec::with_capacity(frames * self.num_channels * BYTES_PER_SAMPLE);

        let mut remaining = self.num_frames;
        let mut written = 0u64;
        while remaining > 0 {
            let n = remaining.min(frames);
            let buf = &mut raw[..n * in_frame_bytes];
            reader.read_exact(buf)?;
            convert_chunk(self.format, buf, &mut converted);
            writer.write_all(&converted)?;
            written += converted.len() as u64;
            remaining -= n;
        }

        writer.flush()?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_i16(path: &Path, samples: &[i16]) {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        std::fs::write(path, bytes).unwrap();
    }

    fn read_i16(path: &Path) -> Vec<i16> {
        std::fs::read(path)
            .unwrap()
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn test_open_counts_frames() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("raw.bin");
        write_i16(&src, &[0; 12]);

        let recording = RawBinaryRecording::open(&src, 4, 30000.0, SampleFormat::Int16).unwrap();
        assert_eq!(recording.num_frames(), 3);
        assert_eq!(recording.num_channels(), 4);
        assert!(recording.channel_locations().is_none());
    }

    #[test]
    fn test_open_rejects_partial_frames() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("raw.bin");
        write_i16(&src, &[0; 7]);

        let err = RawBinaryRecording::open(&src, 4, 30000.0, SampleFormat::Int16).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_int16_export_in_small_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("raw.bin");
        let samples: Vec<i16> = (0..2000).map(|i| i as i16 - 1000).collect();
        write_i16(&src, &samples);

        let recording = RawBinaryRecording::open(&src, 2, 30000.0, SampleFormat::Int16).unwrap();
        let out = dir.path().join("recording.dat");
        let written = recording.write_binary_dat(&out, 1).unwrap();

        assert_eq!(written, 4000);
        assert_eq!(read_i16(&out), samples);
    }

    #[test]
    fn test_float32_export_rounds_and_saturates() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("raw.bin");
        let values: [f32; 4] = [1.4, -2.6, 1.0e9, -1.0e9];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        std::fs::write(&src, bytes).unwrap();

        let recording = RawBinaryRecording::open(&src, 2, 30000.0, SampleFormat::Float32).unwrap();
        let out = dir.path().join("recording.dat");
        recording.write_binary_dat(&out, 500).unwrap();

        assert_eq!(read_i16(&out), vec![1, -3, i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_probe_file_formats() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("raw.bin");
        write_i16(&src, &[0; 4]);

        let object = dir.path().join("probe.json");
        std::fs::write(&object, r#"{"channel_locations": [[0, 0], [0, 25]]}"#).unwrap();
        let recording = RawBinaryRecording::open(&src, 2, 30000.0, SampleFormat::Int16)
            .unwrap()
            .with_probe_file(&object)
            .unwrap();
        assert_eq!(
            recording.channel_locations(),
            Some(vec![vec![0.0, 0.0], vec![0.0, 25.0]])
        );

        let list = dir.path().join("list.json");
        std::fs::write(&list, "[[1, 2, 3], [4, 5, 6]]").unwrap();
        let recording = RawBinaryRecording::open(&src, 2, 30000.0, SampleFormat::Int16)
            .unwrap()
            .with_probe_file(&list)
            .unwrap();
        assert_eq!(recording.channel_locations().unwrap()[0].len(), 3);
    }

    #[test]
    fn test_sample_format_parse() {
        assert_eq!("int16".parse::<SampleFormat>().unwrap(), SampleFormat::Int16);
        assert_eq!("f32".parse::<SampleFormat>().unwrap(), SampleFormat::Float32);
        assert!("int64".parse::<SampleFormat>().is_err());
    }
}
