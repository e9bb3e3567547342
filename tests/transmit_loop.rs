mod common;

use common::VirtualPacer;
use ephys_testgen::frame::{decode_frame, FrameFormat, FrameHeader};
use ephys_testgen::pacer::{HybridPacer, SpinPacer};
use ephys_testgen::params::SignalParams;
use ephys_testgen::synth::synthesize;
use ephys_testgen::transmit::{Transmitter, UdpTransport};
use ephys_testgen::Error;
use std::io;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn capture(frames: &mut Vec<Vec<u8>>) -> impl FnMut(&[u8]) -> io::Result<()> + '_ {
    move |b: &[u8]| -> io::Result<()> {
        frames.push(b.to_vec());
        Ok(())
    }
}

#[test]
fn reference_signal_sends_600_full_frames() -> anyhow::Result<()> {
    let p = SignalParams::default();
    let bytes = synthesize(&p)?.to_le_bytes();
    assert_eq!(bytes.len(), 2_400_000);

    let mut frames = Vec::new();
    let mut tx = Transmitter::new(&p, FrameFormat::Raw, VirtualPacer::new())?;
    let report = tx.run(&bytes, &mut capture(&mut frames))?;

    assert_eq!(report.frames_sent, 600);
    assert_eq!(report.bytes_sent, bytes.len());
    assert!(!report.cancelled);
    assert!(frames.iter().all(|f| f.len() == 4000));
    assert_eq!(frames.concat(), bytes);

    let pacer = tx.pacer();
    let interval = tx.interval();
    assert_eq!(pacer.deadlines.len(), 600);
    for (k, d) in pacer.deadlines.iter().enumerate() {
        assert_eq!(*d, pacer.t0 + interval * (k as u32 + 1));
    }
    assert_eq!(report.elapsed, interval * 600);
    assert_eq!(report.max_lateness, Duration::ZERO);
    Ok(())
}

#[test]
fn short_final_frame_is_sent_unpadded() -> anyhow::Result<()> {
    let p = SignalParams {
        duration_s: 1,
        sample_rate_hz: 1000,
        frame_samples: 300,
        num_channels: 2,
        ..SignalParams::default()
    };
    let bytes = synthesize(&p)?.to_le_bytes();
    let mut frames = Vec::new();
    let mut tx = Transmitter::new(&p, FrameFormat::Raw, VirtualPacer::new())?;
    let report = tx.run(&bytes, &mut capture(&mut frames))?;

    let lens: Vec<usize> = frames.iter().map(Vec::len).collect();
    assert_eq!(lens, vec![1200, 1200, 1200, 400]);
    assert_eq!(report.frames_sent, p.frame_count());
    assert_eq!(frames.concat(), bytes);
    Ok(())
}

#[test]
fn empty_input_sends_nothing() -> anyhow::Result<()> {
    let mut frames = Vec::new();
    let mut tx = Transmitter::new(&SignalParams::default(), FrameFormat::Raw, VirtualPacer::new())?;
    let report = tx.run(&[], &mut capture(&mut frames))?;
    assert_eq!(report.frames_sent, 0);
    assert!(frames.is_empty());
    Ok(())
}

#[test]
fn send_failure_halts_with_cursor() -> anyhow::Result<()> {
    let p = SignalParams::default();
    let bytes = synthesize(&p)?.to_le_bytes();
    let mut calls = 0usize;
    let mut failing = |_: &[u8]| -> io::Result<()> {
        calls += 1;
        if calls == 4 {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "unreachable"));
        }
        Ok(())
    };

    let mut tx = Transmitter::new(&p, FrameFormat::Raw, VirtualPacer::new())?;
    let err = tx.run(&bytes, &mut failing).unwrap_err();
    match &err {
        Error::Transport { offset, frame, source } => {
            assert_eq!(*offset, 3 * 4000);
            assert_eq!(*frame, 3);
            assert_eq!(source.kind(), io::ErrorKind::ConnectionRefused);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(err.offset(), Some(12_000));
    assert_eq!(calls, 4);
    // Only the three successful frames were paced.
    assert_eq!(tx.pacer().deadlines.len(), 3);
    Ok(())
}

#[test]
fn stop_flag_ends_at_frame_boundary() -> anyhow::Result<()> {
    let p = SignalParams::default();
    let bytes = synthesize(&p)?.to_le_bytes();
    let stop = Arc::new(AtomicBool::new(false));
    let mut sent = 0usize;
    let flag = stop.clone();
    let mut stopping = |_: &[u8]| -> io::Result<()> {
        sent += 1;
        if sent == 2 {
            flag.store(true, Ordering::Relaxed);
        }
        Ok(())
    };

    let mut tx =
        Transmitter::new(&p, FrameFormat::Raw, VirtualPacer::new())?.with_stop_flag(stop);
    let report = tx.run(&bytes, &mut stopping)?;
    assert!(report.cancelled);
    assert_eq!(report.frames_sent, 2);
    assert_eq!(report.bytes_sent, 8000);
    assert_eq!(sent, 2);
    Ok(())
}

#[test]
fn header_frames_decode_back_to_the_buffer() -> anyhow::Result<()> {
    let p = SignalParams {
        duration_s: 1,
        sample_rate_hz: 1000,
        frame_samples: 250,
        num_channels: 3,
        ..SignalParams::default()
    };
    let bytes = synthesize(&p)?.to_le_bytes();
    let mut frames = Vec::new();
    let mut tx = Transmitter::new(&p, FrameFormat::Header, VirtualPacer::new())?;
    tx.run(&bytes, &mut capture(&mut frames))?;

    assert_eq!(frames.len(), 4);
    let mut rebuilt = Vec::new();
    for f in &frames {
        assert_eq!(FrameHeader::parse(f)?, FrameHeader::u16_frame(3, 250));
        rebuilt.extend(decode_frame(FrameFormat::Header, f, 0)?);
    }
    assert_eq!(rebuilt, bytes);
    Ok(())
}

#[test]
fn header_format_rejects_partial_rows() -> anyhow::Result<()> {
    let p = SignalParams::default();
    let mut tx = Transmitter::new(&p, FrameFormat::Header, VirtualPacer::new())?;
    let err = tx.run(&[0u8; 7], &mut |_: &[u8]| -> io::Result<()> { Ok(()) }).unwrap_err();
    assert!(err.is_config());
    Ok(())
}

#[test]
fn header_format_rejects_uneven_final_frame() -> anyhow::Result<()> {
    let p = SignalParams {
        duration_s: 1,
        sample_rate_hz: 1000,
        frame_samples: 300,
        num_channels: 2,
        ..SignalParams::default()
    };
    let err = Transmitter::new(&p, FrameFormat::Header, VirtualPacer::new())
        .err()
        .unwrap();
    assert!(err.is_config(), "{err}");
    assert!(Transmitter::new(&p, FrameFormat::Raw, VirtualPacer::new()).is_ok());

    // A buffer that leaves a short tail is refused before anything goes out.
    let whole = SignalParams {
        frame_samples: 250,
        ..p.clone()
    };
    let bytes = synthesize(&p)?.to_le_bytes();
    let mut frames = Vec::new();
    let mut tx = Transmitter::new(&whole, FrameFormat::Header, VirtualPacer::new())?;
    let err = tx.run(&bytes[..1200], &mut capture(&mut frames)).unwrap_err();
    assert!(err.is_config(), "{err}");
    assert!(frames.is_empty());
    Ok(())
}

#[test]
fn header_frame_over_datagram_limit_is_a_config_error() -> anyhow::Result<()> {
    let p = SignalParams {
        frame_samples: 32_750,
        num_channels: 1,
        ..SignalParams::default()
    };
    p.validate()?;
    assert!(Transmitter::new(&p, FrameFormat::Raw, VirtualPacer::new()).is_ok());
    let err = Transmitter::new(&p, FrameFormat::Header, VirtualPacer::new())
        .err()
        .unwrap();
    assert!(err.is_config(), "{err}");

    // Largest frame that still fits with the header.
    let p = SignalParams {
        frame_samples: 32_742,
        ..p
    };
    assert!(Transmitter::new(&p, FrameFormat::Header, VirtualPacer::new()).is_ok());
    Ok(())
}

#[test]
fn invalid_params_rejected_before_any_send() {
    let p = SignalParams {
        frame_samples: -1,
        ..SignalParams::default()
    };
    let err = Transmitter::new(&p, FrameFormat::Raw, SpinPacer).err().unwrap();
    assert!(err.is_config());
}

#[test]
fn spin_pacer_keeps_the_interval_floor() -> anyhow::Result<()> {
    // 10 frames, 20 ms apart.
    let p = SignalParams {
        duration_s: 1,
        sample_rate_hz: 1000,
        frame_samples: 20,
        num_channels: 1,
        ..SignalParams::default()
    };
    let bytes = synthesize(&p)?.to_le_bytes();
    let mut stamps = Vec::new();
    let mut tx = Transmitter::new(&p, FrameFormat::Raw, SpinPacer)?;
    let interval = tx.interval();
    let first_n = 10 * tx.bytes_per_frame();
    tx.run(&bytes[..first_n], &mut |_: &[u8]| -> io::Result<()> {
        stamps.push(Instant::now());
        Ok(())
    })?;

    assert_eq!(stamps.len(), 10);
    let eps = Duration::from_millis(1);
    for w in stamps.windows(2) {
        let gap = w[1] - w[0];
        assert!(gap + eps >= interval, "gap {gap:?} < interval {interval:?}");
    }
    Ok(())
}

#[test]
fn udp_loopback_delivers_every_frame_in_order() -> anyhow::Result<()> {
    let rx = UdpSocket::bind("127.0.0.1:0")?;
    rx.set_read_timeout(Some(Duration::from_secs(2)))?;
    let addr = rx.local_addr()?;

    let p = SignalParams {
        duration_s: 1,
        sample_rate_hz: 1000,
        frame_samples: 250,
        num_channels: 2,
        ..SignalParams::default()
    };
    let bytes = synthesize(&p)?.to_le_bytes();
    let mut transport = UdpTransport::connect(&addr.to_string())?;
    assert_eq!(transport.dest(), addr);

    let mut tx = Transmitter::new(&p, FrameFormat::Raw, HybridPacer::default())?;
    let report = tx.run(&bytes, &mut transport)?;
    assert_eq!(report.frames_sent, 4);

    let mut got = Vec::new();
    let mut buf = vec![0u8; 65_536];
    let src_port = transport.local_addr()?.port();
    for _ in 0..report.frames_sent {
        let (n, peer) = rx.recv_from(&mut buf)?;
        assert_eq!(n, 1000);
        assert_eq!(peer.port(), src_port);
        got.extend_from_slice(&buf[..n]);
    }
    assert_eq!(got, bytes);
    Ok(())
}
