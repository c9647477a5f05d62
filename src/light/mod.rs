pub mod driver;

use serde::{Deserialize, Serialize};

pub use driver::{LightDriver, LightDriverContext};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PulseEvent {
    On,
    Off,
}

/// Square-wave phase for the light pulses, advanced by real elapsed time.
///
/// Independent of the audio phase: both read the same beat program but
/// never share mutable state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LightPulseClock {
    cycle: f64,
    was_on: bool,
}

impl LightPulseClock {
    const DUTY: f64 = 0.5;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn cycle_fraction(&self) -> f64 {
        self.cycle
    }

    /// Last reported state.
    pub fn is_on(&self) -> bool {
        self.was_on
    }

    /// Advance by `dt_secs` at `beat_hz` and report an edge if the on/off
    /// state changed. Several cycles inside one tick collapse into the state
    /// they end on; missed pulses are not replayed.
    pub fn tick(&mut self, dt_secs: f64, beat_hz: f64) -> Option<PulseEvent> {
        let advance = dt_secs * beat_hz;
        if advance.is_finite() && advance > 0.0 {
            self.cycle = (self.cycle + advance).rem_euclid(1.0);
            // rem_euclid can round up to exactly 1.0 for tiny negatives.
            if self.cycle >= 1.0 {
                self.cycle = 0.0;
            }
        }

        let is_on = self.cycle < Self::DUTY;
        if is_on == self.was_on {
            return None;
        }
        self.was_on = is_on;
        Some(if is_on { PulseEvent::On } else { PulseEvent::Off })
    }

    /// Final edge on shutdown: `Off` if the light is currently on.
    pub fn force_off(&mut self) -> Option<PulseEvent> {
        if !self.was_on {
            return None;
        }
        self.was_on = false;
        Some(PulseEvent::Off)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
