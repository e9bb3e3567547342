use crate::error::{Error, Result};
use anyhow::Context;
use std::time::Duration;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_BYTES: usize = 65_507;

/// Bytes per sample on the wire (unsigned 16-bit).
pub const SAMPLE_BYTES: usize = 2;

/// Signal and framing parameters, fixed for the lifetime of a run.
///
/// Counts are kept signed so that a negative value coming from a config file or the
/// command line is reported by [`SignalParams::validate`] instead of failing to parse.
#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct SignalParams {
    pub duration_s: i64,
    pub num_channels: i64,
    pub frame_samples: i64,
    pub sample_rate_hz: i64,

    pub high_level: f64,
    pub low_level: f64,

    pub scale_offset: f64,
    pub scale_divisor: f64,
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            duration_s: 10,
            num_channels: 4,
            frame_samples: 500,
            sample_rate_hz: 30_000,
            high_level: 100.0,
            low_level: -100.0,
            scale_offset: 32_768.0,
            scale_divisor: 0.195,
        }
    }
}

impl SignalParams {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("read params file {path}"))?;
        let params: SignalParams = toml::from_str(&content).context("parse params toml")?;
        Ok(params)
    }

    /// Checks every constraint the synthesizer and transmitter rely on.
    pub fn validate(&self) -> Result<()> {
        positive("duration_s", self.duration_s)?;
        positive("num_channels", self.num_channels)?;
        positive("frame_samples", self.frame_samples)?;
        positive("sample_rate_hz", self.sample_rate_hz)?;

        if !self.high_level.is_finite() || !self.low_level.is_finite() {
            return Err(Error::config("test levels must be finite"));
        }
        if !self.scale_offset.is_finite() {
            return Err(Error::config("scale_offset must be finite"));
        }
        if !self.scale_divisor.is_finite() || self.scale_divisor == 0.0 {
            return Err(Error::config(format!(
                "scale_divisor must be finite and non-zero, got {}",
                self.scale_divisor
            )));
        }

        let frame_bytes = (self.frame_samples as u128)
            * (self.num_channels as u128)
            * (SAMPLE_BYTES as u128);
        if frame_bytes > MAX_DATAGRAM_BYTES as u128 {
            return Err(Error::config(format!(
                "frame of {} samples x {} channels is {frame_bytes} bytes, over the {MAX_DATAGRAM_BYTES}-byte datagram limit",
                self.frame_samples, self.num_channels
            )));
        }

        let total = (self.duration_s as u128)
            * (self.sample_rate_hz as u128)
            * (self.num_channels as u128)
            * (SAMPLE_BYTES as u128);
        if total > isize::MAX as u128 {
            return Err(Error::config(format!(
                "signal of {total} bytes does not fit in memory"
            )));
        }
        Ok(())
    }

    pub fn channels(&self) -> usize {
        self.num_channels.max(0) as usize
    }

    pub fn frame_rows(&self) -> usize {
        self.frame_samples.max(0) as usize
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.frame_rows() * self.channels() * SAMPLE_BYTES
    }

    pub fn frames_per_second(&self) -> f64 {
        (self.sample_rate_hz as f64) / (self.frame_samples as f64)
    }

    /// Minimum spacing between the starts of two consecutive sends.
    pub fn frame_interval(&self) -> Duration {
        // frame_samples / sample_rate seconds, rounded up so the floor is never undercut.
        let rate = self.sample_rate_hz.max(1) as u128;
        let nanos = ((self.frame_rows() as u128) * 1_000_000_000).div_ceil(rate);
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }

    /// Rows (time steps) in the whole signal.
    pub fn total_samples(&self) -> usize {
        (self.duration_s.max(0) as usize) * (self.sample_rate_hz.max(0) as usize)
    }

    pub fn total_bytes(&self) -> usize {
        self.total_samples() * self.channels() * SAMPLE_BYTES
    }

    /// Number of datagrams the full signal needs, counting a short final one.
    pub fn frame_count(&self) -> usize {
        let per = self.bytes_per_frame();
        if per == 0 {
            return 0;
        }
        self.total_bytes().div_ceil(per)
    }

    /// (high, low) run lengths of one one-second cycle. The low half absorbs the odd sample.
    pub fn half_cycle_lengths(&self) -> (usize, usize) {
        let rate = self.sample_rate_hz.max(0) as usize;
        let high = rate / 2;
        (high, rate - high)
    }
}

fn positive(name: &str, v: i64) -> Result<()> {
    if v <= 0 {
        return Err(Error::config(format!("{name} must be positive, got {v}")));
    }
    Ok(())
}
