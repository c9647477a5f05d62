use std::f64::consts::TAU;

/// A continuously wrapping phase accumulator in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Phase(f64);

impl Phase {
    pub fn radians(self) -> f64 {
        self.0
    }

    /// Returns `sin(phase)` and then moves the phase forward by one sample.
    #[inline]
    fn step(&mut self, increment: f64) -> f64 {
        let sample = self.0.sin();
        self.0 += increment;
        // Subtract rather than reset so the waveform stays continuous across
        // blocks and frequency changes.
        while self.0 >= TAU {
            self.0 -= TAU;
        }
        sample
    }
}

/// Frequencies for one block of frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frequencies {
    pub left_hz: f64,
    pub right_hz: f64,
    pub second: Option<(f64, f64)>,
    /// Beat-rate amplitude modulation as `(hz, depth)`.
    pub modulation: Option<(f64, f64)>,
    /// Scale applied to each oscillator before summing.
    pub scale: f64,
}

impl Frequencies {
    pub fn pair(left_hz: f64, right_hz: f64) -> Self {
        Self {
            left_hz,
            right_hz,
            second: None,
            modulation: None,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OscillatorPhases {
    pub left: Phase,
    pub right: Phase,
    pub left2: Phase,
    pub right2: Phase,
    pub modulation: Phase,
}

/// Phase accumulators for up to two carrier pairs plus the modulation
/// oscillator. Owned by exactly one sample generator.
#[derive(Debug, Clone)]
pub struct OscillatorBank {
    sample_rate: f64,
    phases: OscillatorPhases,
}

impl OscillatorBank {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: f64::from(sample_rate.max(1)),
            phases: OscillatorPhases::default(),
        }
    }

    pub fn reset(&mut self) {
        self.phases = OscillatorPhases::default();
    }

    pub fn phases(&self) -> OscillatorPhases {
        self.phases
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Next stereo frame before gain and clamping.
    #[inline]
    pub fn next_frame(&mut self, f: &Frequencies) -> (f64, f64) {
        let k = TAU / self.sample_rate;
        let p = &mut self.phases;

        let mut left = p.left.step(k * f.left_hz) * f.scale;
        let mut right = p.right.step(k * f.right_hz) * f.scale;

        if let Some((left2_hz, right2_hz)) = f.second {
            left += p.left2.step(k * left2_hz) * f.scale;
            right += p.right2.step(k * right2_hz) * f.scale;
        }

        if let Some((mod_hz, depth)) = f.modulation {
            let m = (1.0 + p.modulation.step(k * mod_hz)) * 0.5;
            let gain = 1.0 - depth * (1.0 - m);
            left *= gain;
            right *= gain;
        }

        (left, right)
    }

    /// Fills interleaved stereo `out` (L, R, L, R, ...) at the given
    /// frequencies. A trailing odd sample is left untouched.
    pub fn advance(&mut self, out: &mut [f32], f: &Frequencies) {
        for frame in out.chunks_exact_mut(2) {
            let (left, right) = self.next_frame(f);
            frame[0] = left as f32;
            frame[1] = right as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrapped_distance(a: f64, b: f64) -> f64 {
        let d = (a - b).rem_euclid(TAU);
        d.min(TAU - d)
    }

    #[test]
    fn integer_cycles_return_to_zero_phase() {
        let mut bank = OscillatorBank::new(48_000);
        let f = Frequencies::pair(200.0, 200.5);
        let mut block = vec![0.0f32; 480 * 2];
        for _ in 0..100 {
            bank.advance(&mut block, &f);
        }
        let left = bank.phases().left.radians();
        assert!(wrapped_distance(left, 0.0) < 1e-6, "left phase {left}");
        // 200.5 Hz for one second leaves half a cycle.
        let right = bank.phases().right.radians();
        assert!(wrapped_distance(right, std::f64::consts::PI) < 1e-6);
    }

    #[test]
    fn phase_is_continuous_across_frequency_changes() {
        let sr = 48_000.0;
        let mut bank = OscillatorBank::new(48_000);
        let freqs = [200.0, 210.0, 190.0, 440.0, 100.0];
        let f_max = 440.0;
        let max_step = TAU * f_max / sr + 1e-12;

        let mut previous = bank.phases().left.radians();
        for (i, hz) in freqs.iter().cycle().take(50).enumerate() {
            let f = Frequencies::pair(*hz, *hz + 4.0);
            for _ in 0..(37 + i) {
                bank.next_frame(&f);
                let current = bank.phases().left.radians();
                assert!(wrapped_distance(current, previous) <= max_step);
                assert!((0.0..TAU).contains(&current));
                previous = current;
            }
        }
    }

    #[test]
    fn dual_carrier_halves_keep_peak_within_range() {
        let mut bank = OscillatorBank::new(48_000);
        let f = Frequencies {
            second: Some((300.0, 304.0)),
            scale: 0.5,
            ..Frequencies::pair(200.0, 204.0)
        };
        let mut block = vec![0.0f32; 48_000 * 2];
        bank.advance(&mut block, &f);
        assert!(block.iter().all(|s| s.abs() <= 1.0));
        assert!(block.iter().any(|s| s.abs() > 0.9));
    }

    #[test]
    fn modulation_attenuates_by_at_most_depth() {
        let mut bank = OscillatorBank::new(48_000);
        let f = Frequencies {
            modulation: Some((4.0, 0.3)),
            ..Frequencies::pair(200.0, 204.0)
        };
        let mut block = vec![0.0f32; 48_000 * 2];
        bank.advance(&mut block, &f);
        let peak = block.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!(peak <= 1.0);
        assert!(peak > 0.95);
    }

    #[test]
    fn first_sample_is_sin_of_zero() {
        let mut bank = OscillatorBank::new(48_000);
        let (l, r) = bank.next_frame(&Frequencies::pair(200.0, 204.0));
        assert_eq!((l, r), (0.0, 0.0));
    }
}
