//! Synthetic multi-channel square-wave generator streaming over UDP at a device-like cadence.

pub mod error;
pub mod frame;
pub mod pacer;
pub mod params;
pub mod synth;
pub mod transmit;

pub use error::{Error, Result};
