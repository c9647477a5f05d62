pub mod presets;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::AudioEngineError;

pub use presets::{BrainwaveBand, ProgramPreset};

/// Lowest beat frequency the program will ever report.
pub const MIN_BEAT_HZ: f64 = 0.01;

/// One linear ramp segment of a beat program.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BeatStage {
    pub start_hz: f64,
    pub end_hz: f64,
    pub duration_secs: f64,
}

impl BeatStage {
    pub fn new(start_hz: f64, end_hz: f64, duration_secs: f64) -> Self {
        Self {
            start_hz,
            end_hz,
            duration_secs,
        }
    }

    pub fn hold(hz: f64, duration_secs: f64) -> Self {
        Self::new(hz, hz, duration_secs)
    }

    fn validate(&self, index: usize) -> Result<(), AudioEngineError> {
        for (label, hz) in [("startHz", self.start_hz), ("endHz", self.end_hz)] {
            if !hz.is_finite() || hz <= 0.0 {
                return Err(AudioEngineError::invalid(format!(
                    "stage {index}: {label} must be a positive frequency, got {hz}"
                )));
            }
        }
        if !self.duration_secs.is_finite() || self.duration_secs < 0.0 {
            return Err(AudioEngineError::invalid(format!(
                "stage {index}: duration must be >= 0 seconds, got {}",
                self.duration_secs
            )));
        }
        Ok(())
    }

    /// Linear position inside the stage; zero-length stages jump to `end_hz`.
    fn hz_at(&self, offset_secs: f64) -> f64 {
        let frac = if self.duration_secs == 0.0 {
            1.0
        } else {
            (offset_secs / self.duration_secs).clamp(0.0, 1.0)
        };
        self.start_hz + (self.end_hz - self.start_hz) * frac
    }
}

/// Ordered, contiguous sequence of ramp stages mapping session time to a
/// beat frequency. After the last stage the final `end_hz` holds forever.
///
/// Immutable once built. Swap a new program in rather than editing one that
/// the audio thread may be reading.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatProgram {
    stages: Vec<BeatStage>,
    total_secs: f64,
}

impl BeatProgram {
    pub fn new(stages: Vec<BeatStage>) -> Result<Self, AudioEngineError> {
        if stages.is_empty() {
            return Err(AudioEngineError::invalid(
                "beat program needs at least one stage",
            ));
        }
        for (index, stage) in stages.iter().enumerate() {
            stage.validate(index)?;
        }
        let total_secs = stages.iter().map(|s| s.duration_secs).sum();
        Ok(Self { stages, total_secs })
    }

    /// Flat program: a single zero-length stage that holds `hz` from t = 0.
    pub fn constant(hz: f64) -> Result<Self, AudioEngineError> {
        Self::new(vec![BeatStage::hold(hz, 0.0)])
    }

    pub fn stages(&self) -> &[BeatStage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        Duration::from_secs_f64(self.total_secs)
    }

    /// True when every stage starts and ends at the same frequency.
    pub fn is_constant(&self) -> bool {
        let first = self.stages[0].start_hz;
        self.stages
            .iter()
            .all(|s| s.start_hz == first && s.end_hz == first)
    }

    /// Highest beat frequency any stage reaches.
    pub fn max_hz(&self) -> f64 {
        self.stages
            .iter()
            .map(|s| s.start_hz.max(s.end_hz))
            .fold(MIN_BEAT_HZ, f64::max)
    }

    pub fn final_hz(&self) -> f64 {
        self.stages
            .last()
            .map(|s| s.end_hz)
            .unwrap_or(MIN_BEAT_HZ)
            .max(MIN_BEAT_HZ)
    }

    /// Index of the stage containing `elapsed_secs`, or `None` in the hold phase.
    pub fn stage_index_at(&self, elapsed_secs: f64) -> Option<usize> {
        let elapsed = sanitize_elapsed(elapsed_secs);
        let mut cursor = 0.0;
        for (index, stage) in self.stages.iter().enumerate() {
            if elapsed < cursor + stage.duration_secs {
                return Some(index);
            }
            cursor += stage.duration_secs;
        }
        None
    }

    /// Instantaneous beat frequency at `elapsed_secs` since session start.
    ///
    /// Called from the audio thread once per block and from the light driver
    /// once per tick with the same elapsed-time base.
    pub fn instantaneous_hz(&self, elapsed_secs: f64) -> f64 {
        let elapsed = sanitize_elapsed(elapsed_secs);
        let mut cursor = 0.0;
        for stage in &self.stages {
            if elapsed < cursor + stage.duration_secs {
                return stage.hz_at(elapsed - cursor).max(MIN_BEAT_HZ);
            }
            cursor += stage.duration_secs;
        }
        self.final_hz()
    }

    pub fn instantaneous_period(&self, elapsed_secs: f64) -> Duration {
        Duration::from_secs_f64(1.0 / self.instantaneous_hz(elapsed_secs))
    }
}

fn sanitize_elapsed(elapsed_secs: f64) -> f64 {
    if elapsed_secs.is_finite() {
        elapsed_secs.max(0.0)
    } else if elapsed_secs == f64::INFINITY {
        f64::MAX
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn single_ramp_interpolates_then_holds() {
        let program = BeatProgram::new(vec![BeatStage::new(14.0, 12.0, 210.0)]).unwrap();
        assert!(approx(program.instantaneous_hz(0.0), 14.0));
        assert!(approx(program.instantaneous_hz(105.0), 13.0));
        assert!(approx(program.instantaneous_hz(210.0), 12.0));
        assert!(approx(program.instantaneous_hz(500.0), 12.0));
        assert_eq!(program.stage_index_at(500.0), None);
    }

    #[test]
    fn second_stage_uses_its_own_offset() {
        let program = BeatProgram::new(vec![
            BeatStage::new(10.0, 10.0, 60.0),
            BeatStage::new(10.0, 2.0, 120.0),
        ])
        .unwrap();
        assert!(approx(program.instantaneous_hz(90.0), 8.0));
        assert_eq!(program.stage_index_at(90.0), Some(1));
        assert_eq!(program.total_duration(), Duration::from_secs(180));
    }

    #[test]
    fn zero_length_stage_is_a_jump() {
        let program = BeatProgram::new(vec![
            BeatStage::new(10.0, 10.0, 30.0),
            BeatStage::new(10.0, 4.0, 0.0),
            BeatStage::new(4.0, 4.0, 30.0),
        ])
        .unwrap();
        assert!(approx(program.instantaneous_hz(29.999), 10.0));
        assert!(approx(program.instantaneous_hz(30.0), 4.0));
    }

    #[test]
    fn constant_program_holds_from_zero() {
        let program = BeatProgram::constant(6.0).unwrap();
        assert!(program.is_constant());
        assert!(approx(program.instantaneous_hz(0.0), 6.0));
        assert!(approx(program.instantaneous_hz(3600.0), 6.0));
        assert_eq!(program.total_duration(), Duration::ZERO);
    }

    #[test]
    fn negative_and_nan_time_read_as_start() {
        let program = BeatProgram::new(vec![BeatStage::new(14.0, 12.0, 210.0)]).unwrap();
        assert!(approx(program.instantaneous_hz(-5.0), 14.0));
        assert!(approx(program.instantaneous_hz(f64::NAN), 14.0));
        assert!(approx(program.instantaneous_hz(f64::INFINITY), 12.0));
    }

    #[test]
    fn rejects_non_positive_frequencies_and_negative_durations() {
        assert!(BeatProgram::new(vec![]).is_err());
        assert!(BeatProgram::new(vec![BeatStage::new(0.0, 4.0, 10.0)]).is_err());
        assert!(BeatProgram::new(vec![BeatStage::new(4.0, -1.0, 10.0)]).is_err());
        assert!(BeatProgram::new(vec![BeatStage::new(4.0, 4.0, -1.0)]).is_err());
        assert!(BeatProgram::constant(f64::NAN).is_err());
    }

    #[test]
    fn period_is_reciprocal_of_frequency() {
        let program = BeatProgram::constant(4.0).unwrap();
        assert_eq!(program.instantaneous_period(0.0), Duration::from_millis(250));
    }
}
