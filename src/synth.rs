//! Square-wave synthesis.
//!
//! One generator output is shared by every channel: all columns of a row carry the same
//! value. Independent per-channel signals are not modelled.

use crate::error::{Error, Result};
use crate::params::{SignalParams, SAMPLE_BYTES};
use tracing::debug;

/// Maps a physical level to a device sample: `round(offset + level / divisor)`.
pub fn scale_level(level: f64, offset: f64, divisor: f64) -> Result<u16> {
    let v = (offset + level / divisor).round();
    if !v.is_finite() || v < 0.0 || v > u16::MAX as f64 {
        return Err(Error::config(format!(
            "level {level} scales to {v}, outside the 16-bit sample range"
        )));
    }
    Ok(v as u16)
}

/// Time-major sample matrix: `rows x num_channels` values, row after row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleBuffer {
    num_channels: usize,
    samples: Vec<u16>,
}

impl SampleBuffer {
    pub fn new(num_channels: usize, samples: Vec<u16>) -> Result<Self> {
        if num_channels == 0 {
            return Err(Error::config("sample buffer needs at least one channel"));
        }
        if samples.len() % num_channels != 0 {
            return Err(Error::config(format!(
                "{} samples do not fill whole rows of {num_channels} channels",
                samples.len()
            )));
        }
        Ok(Self {
            num_channels,
            samples,
        })
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn rows(&self) -> usize {
        self.samples.len() / self.num_channels
    }

    pub fn row(&self, i: usize) -> &[u16] {
        let c = self.num_channels;
        &self.samples[i * c..(i + 1) * c]
    }

    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    /// One channel's samples over time.
    pub fn channel(&self, ch: usize) -> impl Iterator<Item = u16> + '_ {
        self.samples
            .iter()
            .skip(ch)
            .step_by(self.num_channels)
            .copied()
    }

    /// Flattened wire bytes, little-endian whatever the host order.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * SAMPLE_BYTES);
        for &s in &self.samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    pub fn from_le_bytes(num_channels: usize, bytes: &[u8]) -> Result<Self> {
        if bytes.len() % SAMPLE_BYTES != 0 {
            return Err(Error::config(format!(
                "{} bytes is not a whole number of samples",
                bytes.len()
            )));
        }
        let samples = bytes
            .chunks_exact(SAMPLE_BYTES)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        Self::new(num_channels, samples)
    }
}

/// Builds the whole signal up front: one square-wave cycle per second, high half first.
pub fn synthesize(p: &SignalParams) -> Result<SampleBuffer> {
    p.validate()?;
    let hi = scale_level(p.high_level, p.scale_offset, p.scale_divisor)?;
    let lo = scale_level(p.low_level, p.scale_offset, p.scale_divisor)?;

    let (n_hi, n_lo) = p.half_cycle_lengths();
    let c = p.channels();

    let mut second = Vec::with_capacity((n_hi + n_lo) * c);
    second.extend(std::iter::repeat(hi).take(n_hi * c));
    second.extend(std::iter::repeat(lo).take(n_lo * c));

    let samples = second.repeat(p.duration_s as usize);
    debug!(
        high = hi,
        low = lo,
        rows = samples.len() / c,
        channels = c,
        "synthesized square wave"
    );
    SampleBuffer::new(c, samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_levels_scale() {
        assert_eq!(scale_level(100.0, 32_768.0, 0.195).unwrap(), 33_281);
        assert_eq!(scale_level(-100.0, 32_768.0, 0.195).unwrap(), 32_255);
        assert_eq!(scale_level(0.0, 32_768.0, 0.195).unwrap(), 32_768);
    }

    #[test]
    fn out_of_range_levels_fail() {
        assert!(scale_level(10_000.0, 32_768.0, 0.195).unwrap_err().is_config());
        assert!(scale_level(-10_000.0, 32_768.0, 0.195).unwrap_err().is_config());
        assert_eq!(scale_level(-0.4, 0.0, 1.0).unwrap(), 0);
        assert_eq!(scale_level(65_535.4, 0.0, 1.0).unwrap(), 65_535);
        assert!(scale_level(65_535.5, 0.0, 1.0).is_err());
    }

    #[test]
    fn synthesize_fails_before_building_on_bad_level() {
        let p = SignalParams {
            high_level: 1e9,
            ..SignalParams::default()
        };
        assert!(synthesize(&p).unwrap_err().is_config());
    }

    #[test]
    fn one_channel_one_second_layout() {
        let p = SignalParams {
            duration_s: 2,
            num_channels: 3,
            sample_rate_hz: 10,
            frame_samples: 5,
            ..SignalParams::default()
        };
        let buf = synthesize(&p).unwrap();
        assert_eq!(buf.rows(), 20);
        let ch: Vec<u16> = buf.channel(1).collect();
        let second = [[33_281u16; 5], [32_255u16; 5]].concat();
        assert_eq!(ch, [second.clone(), second].concat());
    }

    #[test]
    fn odd_rate_keeps_one_second_per_cycle() {
        let p = SignalParams {
            duration_s: 1,
            num_channels: 1,
            sample_rate_hz: 5,
            frame_samples: 1,
            ..SignalParams::default()
        };
        let buf = synthesize(&p).unwrap();
        assert_eq!(buf.samples(), &[33_281, 33_281, 32_255, 32_255, 32_255]);
    }

    #[test]
    fn bytes_are_little_endian() {
        let buf = SampleBuffer::new(2, vec![0x0102, 0xA0B0]).unwrap();
        assert_eq!(buf.to_le_bytes(), vec![0x02, 0x01, 0xB0, 0xA0]);
        assert_eq!(SampleBuffer::from_le_bytes(2, &buf.to_le_bytes()).unwrap(), buf);
        assert!(SampleBuffer::from_le_bytes(2, &[1, 2, 3]).is_err());
        assert!(SampleBuffer::new(2, vec![1, 2, 3]).is_err());
    }
}
