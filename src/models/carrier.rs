use serde::{Deserialize, Serialize};

use crate::error::AudioEngineError;
use crate::program::BeatProgram;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum StimulationMode {
    /// Continuous stereo synthesis; the beat is the left/right offset.
    #[default]
    Binaural,
    /// Pre-rendered on/off pulse clip looped back to back, same in both ears.
    Isochronic,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CarrierPair {
    pub left_hz: f64,
    pub right_hz: f64,
}

impl CarrierPair {
    pub fn new(left_hz: f64, right_hz: f64) -> Self {
        Self { left_hz, right_hz }
    }

    /// Pair whose right channel is recomputed from the beat on every block.
    pub fn linked(left_hz: f64) -> Self {
        Self::new(left_hz, left_hz)
    }

    fn relinked(self, beat_hz: f64) -> Self {
        Self::new(self.left_hz, self.left_hz + beat_hz)
    }
}

/// Per-session carrier parameters. Immutable once a session starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CarrierConfig {
    pub primary: CarrierPair,
    #[serde(default)]
    pub secondary: Option<CarrierPair>,
    pub sample_rate: u32,
    /// When set, `right = left + beat` at every instant and the stored
    /// right frequencies are ignored.
    #[serde(default = "default_true")]
    pub beat_linked: bool,
    /// Depth of the beat-rate amplitude modulation; 0 disables it.
    #[serde(default)]
    pub modulation_depth: f64,
    /// Per-oscillator scale. `None` picks 1.0 for one carrier, 0.5 for two.
    #[serde(default)]
    pub channel_scale: Option<f64>,
    #[serde(default)]
    pub mode: StimulationMode,
}

fn default_true() -> bool {
    true
}

impl CarrierConfig {
    /// Single beat-linked carrier with no modulation.
    pub fn binaural(left_hz: f64, sample_rate: u32) -> Self {
        Self {
            primary: CarrierPair::linked(left_hz),
            secondary: None,
            sample_rate,
            beat_linked: true,
            modulation_depth: 0.0,
            channel_scale: None,
            mode: StimulationMode::Binaural,
        }
    }

    pub fn isochronic(carrier_hz: f64, sample_rate: u32) -> Self {
        Self {
            mode: StimulationMode::Isochronic,
            ..Self::binaural(carrier_hz, sample_rate)
        }
    }

    pub fn with_secondary(mut self, left_hz: f64) -> Self {
        self.secondary = Some(CarrierPair::linked(left_hz));
        self
    }

    pub fn with_modulation(mut self, depth: f64) -> Self {
        self.modulation_depth = depth;
        self
    }

    pub fn with_channel_scale(mut self, scale: f64) -> Self {
        self.channel_scale = Some(scale);
        self
    }

    pub fn is_dual(&self) -> bool {
        self.secondary.is_some()
    }

    pub fn effective_scale(&self, dual_default: f64) -> f64 {
        self.channel_scale
            .unwrap_or(if self.is_dual() { dual_default } else { 1.0 })
    }

    /// Carrier pairs at the given instantaneous beat frequency.
    pub fn pairs_at(&self, beat_hz: f64) -> (CarrierPair, Option<CarrierPair>) {
        if self.beat_linked {
            (
                self.primary.relinked(beat_hz),
                self.secondary.map(|pair| pair.relinked(beat_hz)),
            )
        } else {
            (self.primary, self.secondary)
        }
    }

    pub fn validate(&self) -> Result<(), AudioEngineError> {
        if self.sample_rate == 0 {
            return Err(AudioEngineError::invalid("sample rate must be non-zero"));
        }
        let nyquist = self.sample_rate as f64 / 2.0;
        let mut carriers = vec![("left", self.primary.left_hz)];
        if !self.beat_linked {
            carriers.push(("right", self.primary.right_hz));
        }
        if let Some(pair) = self.secondary {
            carriers.push(("left2", pair.left_hz));
            if !self.beat_linked {
                carriers.push(("right2", pair.right_hz));
            }
        }
        for (label, hz) in carriers {
            if !hz.is_finite() || hz <= 0.0 {
                return Err(AudioEngineError::invalid(format!(
                    "{label} carrier must be a positive frequency, got {hz}"
                )));
            }
            if hz >= nyquist {
                return Err(AudioEngineError::invalid(format!(
                    "{label} carrier {hz} Hz is at or above Nyquist ({nyquist} Hz)"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.modulation_depth) {
            return Err(AudioEngineError::invalid(format!(
                "modulation depth must be within [0, 1], got {}",
                self.modulation_depth
            )));
        }
        if let Some(scale) = self.channel_scale {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(AudioEngineError::invalid(format!(
                    "channel scale must be positive, got {scale}"
                )));
            }
        }
        Ok(())
    }
}

/// Everything both producers read: swapped as one unit on reconfiguration.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub carrier: CarrierConfig,
    pub program: BeatProgram,
}

impl SessionPlan {
    pub fn new(carrier: CarrierConfig, program: BeatProgram) -> Result<Self, AudioEngineError> {
        carrier.validate()?;
        if carrier.mode == StimulationMode::Isochronic && !program.is_constant() {
            return Err(AudioEngineError::invalid(
                "isochronic mode plays a fixed-length clip and needs a constant beat program",
            ));
        }
        if carrier.mode == StimulationMode::Binaural && carrier.beat_linked {
            // Linked right carriers sit `beat` above the left; check the peak.
            let nyquist = carrier.sample_rate as f64 / 2.0;
            let beat = program.max_hz();
            let lefts = std::iter::once(carrier.primary.left_hz)
                .chain(carrier.secondary.map(|pair| pair.left_hz));
            for left in lefts {
                if left + beat >= nyquist {
                    return Err(AudioEngineError::invalid(format!(
                        "linked right carrier reaches {} Hz, at or above Nyquist ({nyquist} Hz)",
                        left + beat
                    )));
                }
            }
        }
        Ok(Self { carrier, program })
    }
}
