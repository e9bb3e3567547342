//! Waiting strategies between frames.
//!
//! Pacing only sets a floor on the gap between sends. A late frame is never made up for by
//! sending the next one early.

use std::time::{Duration, Instant};

pub trait Pacer {
    /// Current reading of the monotonic clock.
    fn now(&self) -> Instant {
        Instant::now()
    }

    /// Returns no earlier than `deadline`.
    fn wait_until(&mut self, deadline: Instant);
}

/// Polls the clock until the deadline. Burns a core; never yields to the scheduler.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpinPacer;

impl Pacer for SpinPacer {
    fn wait_until(&mut self, deadline: Instant) {
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }
}

/// Sleeps through most of the wait and spins the last `spin_margin`.
#[derive(Clone, Copy, Debug)]
pub struct HybridPacer {
    pub spin_margin: Duration,
}

impl Default for HybridPacer {
    fn default() -> Self {
        Self {
            spin_margin: Duration::from_millis(2),
        }
    }
}

impl Pacer for HybridPacer {
    fn wait_until(&mut self, deadline: Instant) {
        let now = Instant::now();
        if let Some(left) = deadline.checked_duration_since(now) {
            if left > self.spin_margin {
                std::thread::sleep(left - self.spin_margin);
            }
        }
        SpinPacer.wait_until(deadline);
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacerKind {
    #[default]
    Spin,
    Hybrid,
}

impl PacerKind {
    pub fn build(self, spin_margin: Duration) -> Box<dyn Pacer> {
        match self {
            PacerKind::Spin => Box::new(SpinPacer),
            PacerKind::Hybrid => Box::new(HybridPacer { spin_margin }),
        }
    }
}

impl<P: Pacer + ?Sized> Pacer for Box<P> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn wait_until(&mut self, deadline: Instant) {
        (**self).wait_until(deadline)
    }
}
