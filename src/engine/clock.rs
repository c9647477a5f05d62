use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Session-elapsed time shared by the audio thread and the light driver.
///
/// All state is atomic so the audio callback can read it without locking.
/// Pausing freezes the elapsed value; resuming re-anchors the origin so the
/// elapsed time continues from the frozen value instead of counting the pause.
#[derive(Debug)]
pub struct SessionClock {
    base: Instant,
    /// Nanoseconds after `base` at which elapsed time was zero.
    origin_ns: AtomicU64,
    frozen_ns: AtomicU64,
    paused: AtomicBool,
}

impl SessionClock {
    pub fn new() -> Self {
        Self::with_base(Instant::now())
    }

    pub fn with_base(base: Instant) -> Self {
        Self {
            base,
            origin_ns: AtomicU64::new(0),
            frozen_ns: AtomicU64::new(0),
            paused: AtomicBool::new(true),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(Instant::now())
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        if self.is_paused() {
            return Duration::from_nanos(self.frozen_ns.load(Ordering::Acquire));
        }
        let origin = self.origin_ns.load(Ordering::Acquire);
        Duration::from_nanos(self.offset_ns(now).saturating_sub(origin))
    }

    /// Zero elapsed time at `now` and start counting.
    pub fn restart_at(&self, now: Instant) {
        self.frozen_ns.store(0, Ordering::Release);
        self.origin_ns.store(self.offset_ns(now), Ordering::Release);
        self.paused.store(false, Ordering::Release);
    }

    pub fn restart(&self) {
        self.restart_at(Instant::now());
    }

    pub fn freeze_at(&self, now: Instant) {
        if self.is_paused() {
            return;
        }
        let elapsed = self.elapsed_at(now);
        self.frozen_ns
            .store(elapsed.as_nanos() as u64, Ordering::Release);
        self.paused.store(true, Ordering::Release);
    }

    pub fn freeze(&self) {
        self.freeze_at(Instant::now());
    }

    /// Move the origin to `now - frozen` so elapsed continues where it froze.
    pub fn resume_at(&self, now: Instant) {
        if !self.is_paused() {
            return;
        }
        let frozen = self.frozen_ns.load(Ordering::Acquire);
        let origin = self.offset_ns(now).saturating_sub(frozen);
        self.origin_ns.store(origin, Ordering::Release);
        self.paused.store(false, Ordering::Release);
    }

    pub fn resume(&self) {
        self.resume_at(Instant::now());
    }

    /// Stop counting and read zero until the next restart.
    pub fn clear(&self) {
        self.paused.store(true, Ordering::Release);
        self.frozen_ns.store(0, Ordering::Release);
    }

    fn offset_ns(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.base).as_nanos() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}
