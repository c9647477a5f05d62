use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::audio::{FadePlan, MixSettings};
use crate::error::AudioEngineError;
use crate::models::{CarrierConfig, SessionPlan, StimulationMode};
use crate::program::ProgramPreset;

pub const CONFIG_ENV: &str = "ENTRAINER_CONFIG";
pub const DEBUG_ENV: &str = "ENTRAINER_DEBUG";

/// Session the demo runner configures; hosts normally build their own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    pub preset: ProgramPreset,
    pub mode: StimulationMode,
    pub carrier_hz: f64,
    pub secondary_carrier_hz: Option<f64>,
    pub amplitude_modulation: bool,
    pub muted: bool,
    pub duration_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            preset: ProgramPreset::default(),
            mode: StimulationMode::Binaural,
            carrier_hz: 200.0,
            secondary_carrier_hz: None,
            amplitude_modulation: false,
            muted: false,
            duration_secs: 60,
        }
    }
}

/// Engine tuning. Every field has a default, so a settings file only needs
/// the keys it changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub sample_rate: u32,
    pub block_frames: usize,
    pub light_tick_ms: u64,
    pub fade_steps: u32,
    pub fade_duration_ms: u64,
    pub dual_carrier_scale: f64,
    pub modulation_depth: f64,
    pub min_queued_buffers: usize,
    pub default_volume: f32,
    pub event_capacity: usize,
    pub session: SessionSettings,
    #[serde(skip)]
    pub debug: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_frames: 256,
            light_tick_ms: 16,
            fade_steps: 40,
            fade_duration_ms: 2_000,
            dual_carrier_scale: 0.5,
            modulation_depth: 0.3,
            min_queued_buffers: 2,
            default_volume: 1.0,
            event_capacity: 256,
            session: SessionSettings::default(),
            debug: false,
        }
    }
}

impl EngineSettings {
    /// Read settings from `path`; a missing file means defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let settings: Self = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse settings in {}", path.display()))?
        } else {
            Self::default()
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Settings from `ENTRAINER_CONFIG` (if set) plus the `ENTRAINER_DEBUG` flag.
    pub fn from_env() -> Result<Self> {
        let mut settings = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(&PathBuf::from(path))?,
            None => Self::default(),
        };
        settings.debug = std::env::var(DEBUG_ENV)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            bail!("sampleRate must be greater than zero");
        }
        if self.block_frames == 0 {
            bail!("blockFrames must be greater than zero");
        }
        if self.light_tick_ms == 0 {
            bail!("lightTickMs must be greater than zero");
        }
        if self.fade_steps == 0 {
            bail!("fadeSteps must be greater than zero");
        }
        if self.min_queued_buffers < 2 {
            bail!(
                "minQueuedBuffers must be at least 2, got {}",
                self.min_queued_buffers
            );
        }
        if !(0.0..=1.0).contains(&self.modulation_depth) {
            bail!("modulationDepth must be within [0, 1]");
        }
        if !(self.dual_carrier_scale > 0.0 && self.dual_carrier_scale <= 1.0) {
            bail!("dualCarrierScale must be within (0, 1]");
        }
        if !(0.0..=1.0).contains(&self.default_volume) {
            bail!("defaultVolume must be within [0, 1]");
        }
        Ok(())
    }

    pub fn fade_plan(&self) -> FadePlan {
        FadePlan::new(self.fade_steps, Duration::from_millis(self.fade_duration_ms))
    }

    pub fn light_tick(&self) -> Duration {
        Duration::from_millis(self.light_tick_ms)
    }

    pub fn mix(&self) -> MixSettings {
        MixSettings {
            block_frames: self.block_frames,
            dual_carrier_scale: self.dual_carrier_scale,
        }
    }

    /// Carrier and program for the configured demo session.
    pub fn session_plan(&self) -> Result<SessionPlan, AudioEngineError> {
        let session = &self.session;
        let mut carrier = match session.mode {
            StimulationMode::Binaural => CarrierConfig::binaural(session.carrier_hz, self.sample_rate),
            StimulationMode::Isochronic => {
                CarrierConfig::isochronic(session.carrier_hz, self.sample_rate)
            }
        };
        if let Some(hz) = session.secondary_carrier_hz {
            carrier = carrier.with_secondary(hz);
        }
        if session.amplitude_modulation {
            carrier = carrier.with_modulation(self.modulation_depth);
        }
        SessionPlan::new(carrier, session.preset.build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let settings: EngineSettings =
            serde_json::from_str(r#"{"sampleRate":44100,"session":{"carrierHz":150.0}}"#).unwrap();
        assert_eq!(settings.sample_rate, 44_100);
        assert_eq!(settings.fade_steps, 40);
        assert_eq!(settings.session.carrier_hz, 150.0);
        assert_eq!(settings.session.duration_secs, 60);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn fade_plan_defaults_to_forty_steps_over_two_seconds() {
        let plan = EngineSettings::default().fade_plan();
        assert_eq!(plan.steps, 40);
        assert_eq!(plan.step_interval(), Duration::from_millis(50));
    }

    #[test]
    fn validation_rejects_shallow_queues() {
        let settings = EngineSettings {
            min_queued_buffers: 1,
            ..EngineSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let path = std::env::temp_dir().join("entrainer-settings-does-not-exist.json");
        let settings = EngineSettings::load(&path).unwrap();
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn default_session_plan_is_alpha_binaural() {
        let plan = EngineSettings::default().session_plan().unwrap();
        assert_eq!(plan.carrier.mode, StimulationMode::Binaural);
        assert_eq!(plan.program.instantaneous_hz(0.0), 10.0);
    }
}
