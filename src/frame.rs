//! Datagram layouts.
//!
//! `Raw` is the bare slice of the flattened buffer: little-endian `u16`, channel-interleaved,
//! no header. `Header` prefixes a 22-byte descriptor and lays the frame out channel-major,
//! which is what the Open Ephys socket receiver reads.

use crate::error::{Error, Result};
use crate::params::SAMPLE_BYTES;

pub const HEADER_SIZE: usize = 22;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    #[default]
    Raw,
    Header,
}

/// Sample encodings a receiver understands; this generator only emits `U16`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum Depth {
    U8 = 0,
    S8 = 1,
    U16 = 2,
    S16 = 3,
    S32 = 4,
    F32 = 5,
    F64 = 6,
}

impl Depth {
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            0 => Depth::U8,
            1 => Depth::S8,
            2 => Depth::U16,
            3 => Depth::S16,
            4 => Depth::S32,
            5 => Depth::F32,
            6 => Depth::F64,
            _ => return None,
        })
    }

    pub fn element_size(self) -> u32 {
        match self {
            Depth::U8 | Depth::S8 => 1,
            Depth::U16 | Depth::S16 => 2,
            Depth::S32 | Depth::F32 => 4,
            Depth::F64 => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    pub offset: u32,
    pub num_bytes: u32,
    pub depth: Depth,
    pub element_size: u32,
    pub num_channels: u32,
    pub num_samp: u32,
}

impl FrameHeader {
    pub fn u16_frame(num_channels: usize, num_samp: usize) -> Self {
        Self {
            offset: 0,
            num_bytes: (num_channels * num_samp * SAMPLE_BYTES) as u32,
            depth: Depth::U16,
            element_size: Depth::U16.element_size(),
            num_channels: num_channels as u32,
            num_samp: num_samp as u32,
        }
    }

    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut b = [0u8; HEADER_SIZE];
        b[0..4].copy_from_slice(&self.offset.to_le_bytes());
        b[4..8].copy_from_slice(&self.num_bytes.to_le_bytes());
        b[8..10].copy_from_slice(&(self.depth as u16).to_le_bytes());
        b[10..14].copy_from_slice(&self.element_size.to_le_bytes());
        b[14..18].copy_from_slice(&self.num_channels.to_le_bytes());
        b[18..22].copy_from_slice(&self.num_samp.to_le_bytes());
        b
    }

    pub fn parse(b: &[u8]) -> Result<Self> {
        if b.len() < HEADER_SIZE {
            return Err(Error::frame(format!(
                "{} bytes is shorter than the {HEADER_SIZE}-byte header",
                b.len()
            )));
        }
        let u32_at = |i: usize| u32::from_le_bytes([b[i], b[i + 1], b[i + 2], b[i + 3]]);
        let raw_depth = u16::from_le_bytes([b[8], b[9]]);
        let depth = Depth::from_u16(raw_depth)
            .ok_or_else(|| Error::frame(format!("unknown sample depth {raw_depth}")))?;
        Ok(Self {
            offset: u32_at(0),
            num_bytes: u32_at(4),
            depth,
            element_size: u32_at(10),
            num_channels: u32_at(14),
            num_samp: u32_at(18),
        })
    }
}

/// Builds one datagram payload from an interleaved slice of whole rows.
pub fn encode_frame(format: FrameFormat, chunk: &[u8], num_channels: usize) -> Vec<u8> {
    match format {
        FrameFormat::Raw => chunk.to_vec(),
        FrameFormat::Header => {
            let rows = chunk.len() / (num_channels * SAMPLE_BYTES);
            let mut out = Vec::with_capacity(HEADER_SIZE + chunk.len());
            out.extend_from_slice(&FrameHeader::u16_frame(num_channels, rows).to_bytes());
            for ch in 0..num_channels {
                for r in 0..rows {
                    let at = (r * num_channels + ch) * SAMPLE_BYTES;
                    out.extend_from_slice(&chunk[at..at + SAMPLE_BYTES]);
                }
            }
            out
        }
    }
}

/// Inverse of [`encode_frame`]: returns the interleaved sample bytes.
///
/// `num_channels` is only consulted for `Raw`, where the datagram carries no descriptor.
pub fn decode_frame(format: FrameFormat, datagram: &[u8], num_channels: usize) -> Result<Vec<u8>> {
    match format {
        FrameFormat::Raw => {
            let row = num_channels * SAMPLE_BYTES;
            if row == 0 || datagram.len() % row != 0 {
                return Err(Error::frame(format!(
                    "{} bytes is not a whole number of {num_channels}-channel rows",
                    datagram.len()
                )));
            }
            Ok(datagram.to_vec())
        }
        FrameFormat::Header => {
            let hdr = FrameHeader::parse(datagram)?;
            if hdr.depth != Depth::U16 || hdr.element_size != Depth::U16.element_size() {
                return Err(Error::frame(format!(
                    "expected u16 samples, header says {:?} x {} bytes",
                    hdr.depth, hdr.element_size
                )));
            }
            let c = hdr.num_channels as usize;
            let rows = hdr.num_samp as usize;
            let body = &datagram[HEADER_SIZE..];
            if body.len() != hdr.num_bytes as usize || body.len() != c * rows * SAMPLE_BYTES {
                return Err(Error::frame(format!(
                    "header announces {} bytes ({c} ch x {rows} samples), body has {}",
                    hdr.num_bytes,
                    body.len()
                )));
            }
            let mut out = vec![0u8; body.len()];
            for ch in 0..c {
                for r in 0..rows {
                    let src = (ch * rows + r) * SAMPLE_BYTES;
                    let dst = (r * c + ch) * SAMPLE_BYTES;
                    out[dst..dst + SAMPLE_BYTES].copy_from_slice(&body[src..src + SAMPLE_BYTES]);
                }
            }
            Ok(out)
        }
    }
}
