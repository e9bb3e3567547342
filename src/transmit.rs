//! Frame-by-frame transmission at a fixed cadence.

use crate::error::{Error, Result};
use crate::frame::{encode_frame, FrameFormat, HEADER_SIZE};
use crate::pacer::Pacer;
use crate::params::{SignalParams, MAX_DATAGRAM_BYTES};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fire-and-forget datagram sink.
pub trait Transport {
    fn send(&mut self, payload: &[u8]) -> io::Result<()>;
}

impl<F> Transport for F
where
    F: FnMut(&[u8]) -> io::Result<()>,
{
    fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        self(payload)
    }
}

/// Unconnected UDP socket sending every frame to one fixed destination.
pub struct UdpTransport {
    socket: UdpSocket,
    dest: SocketAddr,
}

impl UdpTransport {
    pub fn connect(dest: &str) -> io::Result<Self> {
        let dest = dest.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("{dest} resolves to nothing"))
        })?;
        let bind = if dest.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind)?;
        Ok(Self { socket, dest })
    }

    pub fn dest(&self) -> SocketAddr {
        self.dest
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        let n = self.socket.send_to(payload, self.dest)?;
        if n != payload.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("datagram truncated: {n} of {} bytes sent", payload.len()),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxReport {
    pub frames_sent: usize,
    pub bytes_sent: usize,
    pub elapsed: Duration,
    /// Stopped at a frame boundary by the stop flag.
    pub cancelled: bool,
    /// Worst overshoot past a frame deadline seen after waiting.
    pub max_lateness: Duration,
}

pub struct Transmitter<P: Pacer> {
    format: FrameFormat,
    num_channels: usize,
    bytes_per_frame: usize,
    interval: Duration,
    frames_per_log: usize,
    pacer: P,
    stop: Option<Arc<AtomicBool>>,
}

impl<P: Pacer> Transmitter<P> {
    pub fn new(p: &SignalParams, format: FrameFormat, pacer: P) -> Result<Self> {
        p.validate()?;
        if format == FrameFormat::Header && HEADER_SIZE + p.bytes_per_frame() > MAX_DATAGRAM_BYTES {
            return Err(Error::config(format!(
                "header frame of {} bytes exceeds the {MAX_DATAGRAM_BYTES}-byte datagram limit",
                HEADER_SIZE + p.bytes_per_frame()
            )));
        }
        if format == FrameFormat::Header && p.total_bytes() % p.bytes_per_frame() != 0 {
            return Err(Error::config(format!(
                "{} samples per frame do not divide the {}-sample signal; header frames must all be full",
                p.frame_samples,
                p.total_samples()
            )));
        }
        Ok(Self {
            format,
            num_channels: p.channels(),
            bytes_per_frame: p.bytes_per_frame(),
            interval: p.frame_interval(),
            frames_per_log: (p.frames_per_second().round() as usize).max(1),
            pacer,
            stop: None,
        })
    }

    /// Polled before every send; setting it ends the run at the next frame boundary.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_frame
    }

    pub fn pacer(&self) -> &P {
        &self.pacer
    }

    /// Sends `bytes` in order, one frame per datagram, then returns.
    ///
    /// The start of each send is at least one interval after the start of the previous one.
    /// A failed send ends the run; the error carries the cursor of the frame that failed.
    /// Header frames must all announce the same size, so in that format `bytes` has to split
    /// into whole frames; only `Raw` sends a short final frame.
    pub fn run<T: Transport + ?Sized>(&mut self, bytes: &[u8], transport: &mut T) -> Result<TxReport> {
        if self.format == FrameFormat::Header && bytes.len() % self.bytes_per_frame != 0 {
            return Err(Error::config(format!(
                "{} bytes is not a whole number of {}-byte header frames",
                bytes.len(),
                self.bytes_per_frame
            )));
        }

        let total = bytes.len();
        let t0 = self.pacer.now();
        let mut report = TxReport::default();
        let mut cursor = 0usize;

        info!(
            total_bytes = total,
            frame_bytes = self.bytes_per_frame,
            interval_us = self.interval.as_micros() as u64,
            "starting transmission"
        );

        while cursor < total {
            if self.stop.as_ref().is_some_and(|s| s.load(Ordering::Relaxed)) {
                report.cancelled = true;
                warn!(cursor, frames = report.frames_sent, "transmission stopped early");
                break;
            }

            let start = self.pacer.now();
            let end = (cursor + self.bytes_per_frame).min(total);
            let chunk = &bytes[cursor..end];
            let sent = match self.format {
                FrameFormat::Raw => transport.send(chunk),
                FrameFormat::Header => {
                    transport.send(&encode_frame(self.format, chunk, self.num_channels))
                }
            };
            sent.map_err(|source| Error::Transport {
                offset: cursor,
                frame: report.frames_sent,
                source,
            })?;

            let deadline = start + self.interval;
            self.pacer.wait_until(deadline);
            let late = self.pacer.now().saturating_duration_since(deadline);
            report.max_lateness = report.max_lateness.max(late);

            cursor = end;
            report.frames_sent += 1;
            report.bytes_sent = cursor;

            if report.frames_sent % self.frames_per_log == 0 {
                debug!(
                    frames = report.frames_sent,
                    cursor,
                    elapsed_ms = self.pacer.now().saturating_duration_since(t0).as_millis() as u64,
                    "progress"
                );
            }
        }

        report.elapsed = self.pacer.now().saturating_duration_since(t0);
        info!(
            frames = report.frames_sent,
            bytes = report.bytes_sent,
            elapsed_ms = report.elapsed.as_millis() as u64,
            max_lateness_us = report.max_lateness.as_micros() as u64,
            cancelled = report.cancelled,
            "transmission finished"
        );
        Ok(report)
    }
}
