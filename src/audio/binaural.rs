use arc_swap::ArcSwapOption;
use rodio::Source;
use std::sync::Arc;
use std::time::Duration;

use super::envelope::VolumeEnvelope;
use super::oscillator::{Frequencies, OscillatorBank};
use crate::engine::SessionClock;
use crate::models::SessionPlan;

pub const DEFAULT_BLOCK_FRAMES: usize = 256;

/// Mixing constants not carried by the session plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixSettings {
    pub block_frames: usize,
    pub dual_carrier_scale: f64,
}

impl Default for MixSettings {
    fn default() -> Self {
        Self {
            block_frames: DEFAULT_BLOCK_FRAMES,
            dual_carrier_scale: 0.5,
        }
    }
}

/// Binaural stereo source pulled by the audio thread.
///
/// Renders fixed-size interleaved blocks. For each block it reads the beat
/// frequency once at the shared session time, derives the carrier pairs, runs
/// the oscillator bank and ramps the envelope gain across the block. The
/// block buffer is allocated up front. The plan, clock and envelope are read
/// through atomics only, so the callback never blocks.
pub struct StereoGenerator {
    plan: Arc<ArcSwapOption<SessionPlan>>,
    clock: Arc<SessionClock>,
    envelope: Arc<VolumeEnvelope>,
    bank: OscillatorBank,
    mix: MixSettings,
    sample_rate: u32,
    block: Vec<f32>,
    cursor: usize,
    last_gain: f32,
}

impl StereoGenerator {
    pub fn new(
        plan: Arc<ArcSwapOption<SessionPlan>>,
        clock: Arc<SessionClock>,
        envelope: Arc<VolumeEnvelope>,
        sample_rate: u32,
        mix: MixSettings,
    ) -> Self {
        let frames = mix.block_frames.max(1);
        let block = vec![0.0; frames * 2];
        Self {
            plan,
            clock,
            envelope,
            bank: OscillatorBank::new(sample_rate),
            mix,
            sample_rate,
            cursor: block.len(),
            block,
            last_gain: 0.0,
        }
    }

    #[cfg(test)]
    pub(crate) fn oscillators(&self) -> &OscillatorBank {
        &self.bank
    }

    /// Fill `out` (interleaved L/R) for session time `elapsed_secs`.
    ///
    /// Always produces samples: a missing plan or a non-finite time renders
    /// silence and leaves the oscillator phases where they were.
    pub fn render(&mut self, out: &mut [f32], elapsed_secs: f64) {
        let plan = self.plan.load();
        let Some(plan) = plan.as_ref() else {
            out.fill(0.0);
            return;
        };
        if !elapsed_secs.is_finite() {
            out.fill(0.0);
            return;
        }

        let beat_hz = plan.program.instantaneous_hz(elapsed_secs);
        let carrier = &plan.carrier;
        let (primary, secondary) = carrier.pairs_at(beat_hz);
        let frequencies = Frequencies {
            left_hz: primary.left_hz,
            right_hz: primary.right_hz,
            second: secondary.map(|pair| (pair.left_hz, pair.right_hz)),
            modulation: (carrier.modulation_depth > 0.0)
                .then_some((beat_hz, carrier.modulation_depth)),
            scale: carrier.effective_scale(self.mix.dual_carrier_scale),
        };

        self.bank.advance(out, &frequencies);

        let target_gain = self.envelope.level();
        let frames = (out.len() / 2).max(1);
        let step = (target_gain - self.last_gain) / frames as f32;
        let mut gain = self.last_gain;
        for frame in out.chunks_exact_mut(2) {
            gain += step;
            frame[0] = finish_sample(frame[0] * gain);
            frame[1] = finish_sample(frame[1] * gain);
        }
        self.last_gain = target_gain;
    }

    fn refill(&mut self) {
        let elapsed = self.clock.elapsed_secs();
        let mut block = std::mem::take(&mut self.block);
        self.render(&mut block, elapsed);
        self.block = block;
        self.cursor = 0;
    }
}

/// Output clamp; the safety net for dual carrier at full gain.
#[inline]
fn finish_sample(sample: f32) -> f32 {
    if sample.is_finite() {
        sample.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

impl Iterator for StereoGenerator {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.block.len() {
            self.refill();
        }
        let sample = self.block[self.cursor];
        self.cursor += 1;
        Some(sample)
    }
}

impl Source for StereoGenerator {
    fn current_frame_len(&self) -> Option<usize> {
        None // Infinite stream
    }

    fn channels(&self) -> u16 {
        2 // Stereo
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None // Infinite
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CarrierConfig;
    use crate::program::{BeatProgram, BeatStage};
    use std::f64::consts::TAU;

    fn generator(plan: Option<SessionPlan>, level: f32) -> StereoGenerator {
        let envelope = Arc::new(VolumeEnvelope::new(1.0));
        envelope.set_level(level);
        StereoGenerator::new(
            Arc::new(ArcSwapOption::new(plan.map(Arc::new))),
            Arc::new(SessionClock::new()),
            envelope,
            48_000,
            MixSettings::default(),
        )
    }

    fn plan(carrier: CarrierConfig, program: BeatProgram) -> SessionPlan {
        SessionPlan::new(carrier, program).unwrap()
    }

    #[test]
    fn unconfigured_generator_renders_silence() {
        let mut gen = generator(None, 1.0);
        let mut out = vec![1.0f32; 512];
        gen.render(&mut out, 1.0);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn one_second_of_200hz_returns_left_phase_to_zero() {
        let mut gen = generator(
            Some(plan(
                CarrierConfig::binaural(200.0, 48_000),
                BeatProgram::constant(0.5).unwrap(),
            )),
            1.0,
        );
        let mut out = vec![0.0f32; 256 * 2];
        let mut elapsed = 0.0;
        for _ in 0..(48_000 / 256) {
            gen.render(&mut out, elapsed);
            elapsed += 256.0 / 48_000.0;
        }
        // 187 blocks of 256 frames leave 128 frames to one full second.
        let mut tail = vec![0.0f32; 128 * 2];
        gen.render(&mut tail, elapsed);

        let left = gen.oscillators().phases().left.radians();
        assert!(left.min(TAU - left) < 1e-6, "left phase {left}");
        // Right runs at 200.5 Hz: half a cycle ahead after one second.
        let right = gen.oscillators().phases().right.radians();
        assert!((right - std::f64::consts::PI).abs() < 1e-6, "right phase {right}");
    }

    #[test]
    fn right_channel_tracks_the_ramp() {
        let program = BeatProgram::new(vec![
            BeatStage::new(10.0, 10.0, 60.0),
            BeatStage::new(10.0, 2.0, 120.0),
        ])
        .unwrap();
        let mut gen = generator(Some(plan(CarrierConfig::binaural(200.0, 48_000), program)), 1.0);
        let mut out = vec![0.0f32; 2];
        gen.render(&mut out, 90.0);
        let right = gen.oscillators().phases().right.radians();
        assert!((right - TAU * 208.0 / 48_000.0).abs() < 1e-12);
    }

    #[test]
    fn gain_ramps_across_the_block() {
        let mut gen = generator(
            Some(plan(
                CarrierConfig::binaural(200.0, 48_000),
                BeatProgram::constant(4.0).unwrap(),
            )),
            1.0,
        );
        let mut out = vec![0.0f32; 48_000 * 2];
        gen.render(&mut out, 0.0);
        // The ramp starts at 0 gain; the first 10 ms stay well under the peak.
        let early = out[..960].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        let late = out[out.len() - 960..]
            .iter()
            .fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(early < 0.05);
        assert!(late > 0.9);
    }

    #[test]
    fn output_never_exceeds_unit_range() {
        let carrier = CarrierConfig::binaural(200.0, 48_000)
            .with_secondary(300.0)
            .with_channel_scale(1.0)
            .with_modulation(0.3);
        let mut gen = generator(Some(plan(carrier, BeatProgram::constant(4.0).unwrap())), 1.0);
        let mut out = vec![0.0f32; 48_000 * 2];
        gen.render(&mut out, 0.0);
        gen.render(&mut out, 1.0);
        assert!(out.iter().all(|s| (-1.0..=1.0).contains(s)));
        assert!(out.iter().any(|s| s.abs() == 1.0));
    }

    #[test]
    fn iterator_yields_interleaved_stereo_forever() {
        let gen = generator(
            Some(plan(
                CarrierConfig::binaural(200.0, 48_000),
                BeatProgram::constant(4.0).unwrap(),
            )),
            1.0,
        );
        assert_eq!(gen.channels(), 2);
        assert_eq!(gen.sample_rate(), 48_000);
        assert_eq!(gen.take(10_000).count(), 10_000);
    }
}
