use serde::{Deserialize, Serialize};

use super::{BeatProgram, BeatStage};
use crate::error::AudioEngineError;

/// Classic EEG band targets, used as flat beat programs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum BrainwaveBand {
    Delta,
    Theta,
    Alpha,
    Beta,
    Gamma,
}

impl BrainwaveBand {
    pub fn beat_hz(self) -> f64 {
        match self {
            BrainwaveBand::Delta => 2.0,
            BrainwaveBand::Theta => 6.0,
            BrainwaveBand::Alpha => 10.0,
            BrainwaveBand::Beta => 20.0,
            BrainwaveBand::Gamma => 40.0,
        }
    }
}

/// Serializable description of a beat program, as found in settings files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ProgramPreset {
    Band { band: BrainwaveBand },
    Constant { hz: f64 },
    FlowState,
    Custom { stages: Vec<BeatStage> },
}

impl Default for ProgramPreset {
    fn default() -> Self {
        ProgramPreset::Band {
            band: BrainwaveBand::Alpha,
        }
    }
}

impl ProgramPreset {
    pub fn build(&self) -> Result<BeatProgram, AudioEngineError> {
        match self {
            ProgramPreset::Band { band } => BeatProgram::constant(band.beat_hz()),
            ProgramPreset::Constant { hz } => BeatProgram::constant(*hz),
            ProgramPreset::FlowState => flow_state(),
            ProgramPreset::Custom { stages } => BeatProgram::new(stages.clone()),
        }
    }
}

/// Low-beta to alpha descent: 14 → 12 Hz, then 12 → 10 Hz, then an alpha hold.
pub fn flow_state() -> Result<BeatProgram, AudioEngineError> {
    BeatProgram::new(vec![
        BeatStage::new(14.0, 12.0, 210.0),
        BeatStage::new(12.0, 10.0, 240.0),
        BeatStage::hold(10.0, 600.0),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_state_starts_at_low_beta_and_settles_in_alpha() {
        let program = flow_state().unwrap();
        assert!(!program.is_constant());
        assert_eq!(program.instantaneous_hz(0.0), 14.0);
        assert!((program.instantaneous_hz(105.0) - 13.0).abs() < 1e-9);
        assert_eq!(program.instantaneous_hz(10_000.0), 10.0);
    }

    #[test]
    fn preset_json_uses_kind_tag() {
        let preset: ProgramPreset =
            serde_json::from_str(r#"{"kind":"band","band":"theta"}"#).unwrap();
        assert_eq!(preset.build().unwrap().instantaneous_hz(0.0), 6.0);

        let custom: ProgramPreset = serde_json::from_str(
            r#"{"kind":"custom","stages":[{"startHz":8.0,"endHz":4.0,"durationSecs":60.0}]}"#,
        )
        .unwrap();
        assert!((custom.build().unwrap().instantaneous_hz(30.0) - 6.0).abs() < 1e-9);
    }
}
