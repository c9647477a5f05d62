use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Step count and length of a fade-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadePlan {
    pub steps: u32,
    pub duration: Duration,
}

impl FadePlan {
    pub fn new(steps: u32, duration: Duration) -> Self {
        Self {
            steps: steps.max(1),
            duration,
        }
    }

    pub fn step_interval(&self) -> Duration {
        self.duration / self.steps.max(1)
    }
}

impl Default for FadePlan {
    fn default() -> Self {
        Self::new(40, Duration::from_secs(2))
    }
}

/// Evenly spaced levels from `from` (exclusive) to `to` (inclusive).
#[derive(Debug, Clone)]
pub struct FadeRamp {
    from: f32,
    to: f32,
    steps: u32,
    taken: u32,
    interval: Duration,
}

impl FadeRamp {
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }
}

impl Iterator for FadeRamp {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.taken >= self.steps {
            return None;
        }
        self.taken += 1;
        let frac = self.taken as f32 / self.steps as f32;
        Some(self.from + (self.to - self.from) * frac)
    }
}

/// Fade-in gain shared between the control side (writer) and the audio
/// thread (reader). Lock-free; values are `f32` bit patterns.
#[derive(Debug)]
pub struct VolumeEnvelope {
    level: AtomicU32,
    target: AtomicU32,
    muted: AtomicBool,
    fades_started: AtomicU64,
}

impl VolumeEnvelope {
    pub fn new(target: f32) -> Self {
        Self {
            level: AtomicU32::new(0.0f32.to_bits()),
            target: AtomicU32::new(target.clamp(0.0, 1.0).to_bits()),
            muted: AtomicBool::new(false),
            fades_started: AtomicU64::new(0),
        }
    }

    pub fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Acquire))
    }

    pub fn target(&self) -> f32 {
        f32::from_bits(self.target.load(Ordering::Acquire))
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Number of fade-ins ever started on this envelope.
    pub fn fades_started(&self) -> u64 {
        self.fades_started.load(Ordering::Acquire)
    }

    /// Session start: level always returns to 0, muted or not.
    pub fn reset(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
        self.level.store(0.0f32.to_bits(), Ordering::Release);
    }

    pub fn mute(&self) {
        self.muted.store(true, Ordering::Release);
        self.level.store(0.0f32.to_bits(), Ordering::Release);
    }

    pub fn unmute(&self) {
        self.muted.store(false, Ordering::Release);
    }

    pub fn set_level(&self, level: f32) {
        let clamped = if level.is_finite() {
            level.clamp(0.0, self.target())
        } else {
            0.0
        };
        self.level.store(clamped.to_bits(), Ordering::Release);
        // A mute that raced this store wins.
        if self.is_muted() {
            self.level.store(0.0f32.to_bits(), Ordering::Release);
        }
    }

    /// Ramp from the current level to the target. `None` when muted (the
    /// ramp is skipped, not run towards zero) or already at the target.
    pub fn begin_fade(&self, plan: FadePlan) -> Option<FadeRamp> {
        if self.is_muted() {
            return None;
        }
        let from = self.level();
        let to = self.target();
        if from >= to {
            return None;
        }
        self.fades_started.fetch_add(1, Ordering::AcqRel);
        Some(FadeRamp {
            from,
            to,
            steps: plan.steps.max(1),
            taken: 0,
            interval: plan.step_interval(),
        })
    }
}

impl Default for VolumeEnvelope {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fade_reaches_target_in_fixed_steps() {
        let envelope = VolumeEnvelope::new(1.0);
        let ramp = envelope
            .begin_fade(FadePlan::new(40, Duration::from_secs(2)))
            .unwrap();
        assert_eq!(ramp.interval(), Duration::from_millis(50));
        let levels: Vec<f32> = ramp.collect();
        assert_eq!(levels.len(), 40);
        assert!((levels[0] - 0.025).abs() < 1e-6);
        assert_eq!(*levels.last().unwrap(), 1.0);
        assert!(levels.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn muted_envelope_never_starts_a_fade() {
        let envelope = VolumeEnvelope::new(1.0);
        envelope.reset(true);
        assert!(envelope.begin_fade(FadePlan::default()).is_none());
        assert_eq!(envelope.fades_started(), 0);
        envelope.set_level(0.7);
        assert_eq!(envelope.level(), 0.0);
    }

    #[test]
    fn fade_resumes_from_current_level() {
        let envelope = VolumeEnvelope::new(0.8);
        envelope.set_level(0.4);
        let levels: Vec<f32> = envelope
            .begin_fade(FadePlan::new(4, Duration::from_millis(40)))
            .unwrap()
            .collect();
        assert!((levels[0] - 0.5).abs() < 1e-6);
        assert!((levels[3] - 0.8).abs() < 1e-6);
        envelope.set_level(0.8);
        assert!(envelope.begin_fade(FadePlan::default()).is_none());
    }

    #[test]
    fn mute_zeroes_and_unmute_allows_fading_again() {
        let envelope = VolumeEnvelope::new(1.0);
        envelope.set_level(0.5);
        envelope.mute();
        assert_eq!(envelope.level(), 0.0);
        envelope.unmute();
        assert!(envelope.begin_fade(FadePlan::default()).is_some());
        assert_eq!(envelope.fades_started(), 1);
    }

    #[test]
    fn levels_are_clamped_to_target() {
        let envelope = VolumeEnvelope::new(0.5);
        envelope.set_level(2.0);
        assert_eq!(envelope.level(), 0.5);
        envelope.set_level(f32::NAN);
        assert_eq!(envelope.level(), 0.0);
    }
}
