//! Error types for synthesis and transmission.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every variant halts the run; nothing here is retried.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid parameters or a level that does not fit the sample range.
    #[error("configuration error: {0}")]
    Config(String),

    /// A received datagram does not match the expected layout.
    #[error("malformed frame: {0}")]
    Frame(String),

    /// The transport refused a frame.
    #[error("send of frame {frame} at byte offset {offset} failed: {source}")]
    Transport {
        offset: usize,
        frame: usize,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn frame(msg: impl Into<String>) -> Self {
        Error::Frame(msg.into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Byte offset of the cursor when a send failed.
    pub fn offset(&self) -> Option<usize> {
        match self {
            Error::Transport { offset, .. } => Some(*offset),
            Error::Config(_) | Error::Frame(_) => None,
        }
    }
}
