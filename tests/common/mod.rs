use ephys_testgen::pacer::Pacer;
use std::time::Instant;

/// Clock that only moves when asked to wait, so pacing can be checked without sleeping.
pub struct VirtualPacer {
    pub t0: Instant,
    pub now: Instant,
    pub deadlines: Vec<Instant>,
}

impl VirtualPacer {
    pub fn new() -> Self {
        let t0 = Instant::now();
        Self {
            t0,
            now: t0,
            deadlines: Vec::new(),
        }
    }
}

impl Pacer for VirtualPacer {
    fn now(&self) -> Instant {
        self.now
    }

    fn wait_until(&mut self, deadline: Instant) {
        self.deadlines.push(deadline);
        self.now = self.now.max(deadline);
    }
}
