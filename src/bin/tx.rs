use anyhow::Context;
use clap::Parser;
use ephys_testgen::frame::FrameFormat;
use ephys_testgen::pacer::PacerKind;
use ephys_testgen::params::SignalParams;
use ephys_testgen::synth::synthesize;
use ephys_testgen::transmit::{Transmitter, UdpTransport};
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Square-wave test signal sender over UDP, paced like an acquisition device")]
struct Args {
    /// Receiver address, e.g. 127.0.0.1:9001
    #[arg(long, default_value = "127.0.0.1:9001")]
    addr: String,

    /// Load signal parameters from a TOML file. Flags below override it.
    #[arg(long)]
    params: Option<String>,

    /// Total signal length (seconds).
    #[arg(long, allow_negative_numbers = true)]
    duration_s: Option<i64>,

    #[arg(long, allow_negative_numbers = true)]
    channels: Option<i64>,

    /// Samples per channel in each datagram.
    #[arg(long, allow_negative_numbers = true)]
    frame_samples: Option<i64>,

    #[arg(long, allow_negative_numbers = true)]
    sample_rate_hz: Option<i64>,

    /// High test level (physical units).
    #[arg(long, allow_negative_numbers = true)]
    high: Option<f64>,

    /// Low test level (physical units).
    #[arg(long, allow_negative_numbers = true)]
    low: Option<f64>,

    #[arg(long, allow_negative_numbers = true)]
    scale_offset: Option<f64>,

    #[arg(long, allow_negative_numbers = true)]
    scale_divisor: Option<f64>,

    /// Datagram layout.
    #[arg(long, value_enum, default_value_t = FrameFormat::Raw)]
    format: FrameFormat,

    /// Waiting strategy between frames.
    #[arg(long, value_enum, default_value_t = PacerKind::Spin)]
    pacer: PacerKind,

    /// Final stretch of each wait spent spinning with `--pacer hybrid` (microseconds).
    #[arg(long, default_value_t = 2000)]
    spin_margin_us: u64,

    /// Start immediately instead of waiting for Enter.
    #[arg(long, default_value_t = false)]
    no_prompt: bool,

    /// Log per-second progress.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn signal_params(&self) -> anyhow::Result<SignalParams> {
        let mut p = match &self.params {
            Some(path) => SignalParams::from_file(path)?,
            None => SignalParams::default(),
        };
        if let Some(v) = self.duration_s {
            p.duration_s = v;
        }
        if let Some(v) = self.channels {
            p.num_channels = v;
        }
        if let Some(v) = self.frame_samples {
            p.frame_samples = v;
        }
        if let Some(v) = self.sample_rate_hz {
            p.sample_rate_hz = v;
        }
        if let Some(v) = self.high {
            p.high_level = v;
        }
        if let Some(v) = self.low {
            p.low_level = v;
        }
        if let Some(v) = self.scale_offset {
            p.scale_offset = v;
        }
        if let Some(v) = self.scale_divisor {
            p.scale_divisor = v;
        }
        Ok(p)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn wait_for_enter() -> anyhow::Result<()> {
    eprint!("Press enter key to start...");
    io::stderr().flush().ok();
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read start prompt")?;
    Ok(())
}

struct Sender {
    args: Args,
    params: SignalParams,
}

impl Sender {
    fn new(args: Args) -> anyhow::Result<Self> {
        let params = args.signal_params()?;
        params.validate().context("invalid signal parameters")?;
        Ok(Self { args, params })
    }

    fn run(&self) -> anyhow::Result<()> {
        let p = &self.params;
        let buf = synthesize(p).context("synthesize signal")?;
        let bytes = buf.to_le_bytes();
        info!(
            duration_s = p.duration_s,
            channels = p.num_channels,
            sample_rate_hz = p.sample_rate_hz,
            frames = p.frame_count(),
            frames_per_s = p.frames_per_second(),
            "signal ready"
        );

        let mut transport = UdpTransport::connect(&self.args.addr)
            .with_context(|| format!("open udp socket to {}", self.args.addr))?;
        info!(
            dest = %transport.dest(),
            format = ?self.args.format,
            pacer = ?self.args.pacer,
            "socket ready"
        );

        let pacer = self
            .args
            .pacer
            .build(Duration::from_micros(self.args.spin_margin_us));
        let stop = Arc::new(AtomicBool::new(false));
        let mut tx = Transmitter::new(p, self.args.format, pacer)?.with_stop_flag(stop.clone());

        // Ctrl-C keeps its default behaviour at the prompt; only the stream stops cleanly.
        if !self.args.no_prompt {
            wait_for_enter()?;
        }
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
            .context("install ctrl-c handler")?;

        let report = tx
            .run(&bytes, &mut transport)
            .with_context(|| format!("stream to {}", self.args.addr))?;
        if report.cancelled {
            eprintln!(
                "Stopped after {} of {} frames",
                report.frames_sent,
                p.frame_count()
            );
        } else {
            eprintln!("Done");
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    Sender::new(args)?.run()
}
