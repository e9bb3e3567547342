use anyhow::Context;
use clap::Parser;
use ephys_testgen::frame::{decode_frame, FrameFormat, HEADER_SIZE};
use ephys_testgen::params::{MAX_DATAGRAM_BYTES, SAMPLE_BYTES};
use std::io;
use std::net::UdpSocket;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Diagnostic UDP receiver for the square-wave sender")]
struct Args {
    /// Bind address, e.g. 0.0.0.0:9001 or 127.0.0.1:9001
    #[arg(long, default_value = "127.0.0.1:9001")]
    bind: String,

    /// Datagram layout to expect.
    #[arg(long, value_enum, default_value_t = FrameFormat::Raw)]
    format: FrameFormat,

    /// Channel count, needed to split raw datagrams into rows.
    #[arg(long, default_value_t = 4)]
    channels: usize,

    /// Expected samples per channel per datagram (0 = don't check).
    #[arg(long, default_value_t = 500)]
    frame_samples: usize,

    /// Exit after this many datagrams (0 = until idle timeout).
    #[arg(long, default_value_t = 0)]
    count: u64,

    /// Stop once nothing has arrived for this long, after the first datagram (milliseconds).
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,

    /// Log every datagram.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[derive(Debug, Default)]
struct Stats {
    packets: u64,
    bytes: u64,
    rows: u64,
    bad_frames: u64,
    short_frames: u64,
    first: Option<Instant>,
    last: Option<Instant>,
    min_gap: Option<Duration>,
}

impl Stats {
    fn record_arrival(&mut self, now: Instant) {
        if let Some(last) = self.last {
            let gap = now.saturating_duration_since(last);
            self.min_gap = Some(self.min_gap.map_or(gap, |g| g.min(gap)));
        }
        self.first.get_or_insert(now);
        self.last = Some(now);
    }

    fn packet_rate(&self) -> f64 {
        match (self.first, self.last) {
            (Some(a), Some(b)) if self.packets > 1 => {
                let span = b.saturating_duration_since(a).as_secs_f64();
                if span > 0.0 {
                    ((self.packets - 1) as f64) / span
                } else {
                    f64::INFINITY
                }
            }
            _ => 0.0,
        }
    }
}

struct Receiver {
    args: Args,
    socket: UdpSocket,
    buf: Vec<u8>,
    stats: Stats,
}

impl Receiver {
    fn new(args: Args) -> anyhow::Result<Self> {
        if args.channels == 0 {
            anyhow::bail!("--channels must be positive");
        }
        let socket =
            UdpSocket::bind(&args.bind).with_context(|| format!("bind {}", args.bind))?;
        socket
            .set_read_timeout(Some(Duration::from_millis(args.timeout_ms.max(1))))
            .context("set_read_timeout")?;
        Ok(Self {
            args,
            socket,
            buf: vec![0u8; MAX_DATAGRAM_BYTES + HEADER_SIZE],
            stats: Stats::default(),
        })
    }

    fn handle_datagram(&mut self, n: usize) {
        let now = Instant::now();
        self.stats.record_arrival(now);
        self.stats.packets += 1;
        self.stats.bytes += n as u64;

        let samples = match decode_frame(self.args.format, &self.buf[..n], self.args.channels) {
            Ok(s) => s,
            Err(e) => {
                self.stats.bad_frames += 1;
                warn!(packet = self.stats.packets, "{e}");
                return;
            }
        };
        let row_bytes = self.args.channels * SAMPLE_BYTES;
        let rows = samples.len() / row_bytes;
        self.stats.rows += rows as u64;
        if self.args.frame_samples > 0 && rows != self.args.frame_samples {
            self.stats.short_frames += 1;
            debug!(packet = self.stats.packets, rows, "unexpected frame length");
        }

        let first_row: Vec<u16> = samples
            .chunks_exact(SAMPLE_BYTES)
            .take(self.args.channels)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        if self.stats.packets == 1 {
            info!(bytes = n, rows, first_row = ?first_row, "first datagram");
        } else {
            debug!(packet = self.stats.packets, bytes = n, first_row = ?first_row, "datagram");
        }
    }

    fn run(&mut self) -> anyhow::Result<()> {
        info!(bind = %self.args.bind, format = ?self.args.format, "listening");
        loop {
            if self.args.count != 0 && self.stats.packets >= self.args.count {
                break;
            }
            match self.socket.recv_from(&mut self.buf) {
                Ok((n, _peer)) => self.handle_datagram(n),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    if self.stats.packets > 0 {
                        info!("idle for {} ms, stopping", self.args.timeout_ms);
                        break;
                    }
                }
                Err(e) => return Err(e).context("recv_from"),
            }
        }

        let s = &self.stats;
        info!(
            packets = s.packets,
            bytes = s.bytes,
            rows = s.rows,
            bad_frames = s.bad_frames,
            unexpected_length = s.short_frames,
            packets_per_s = s.packet_rate(),
            min_gap_us = s.min_gap.map(|g| g.as_micros() as u64),
            "summary"
        );
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let default = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    Receiver::new(args)?.run()
}
