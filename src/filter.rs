//! Butterworth filter cascades built from second-order sections.
//!
//! Every section owns its delay line, so a filter instance must not be shared
//! between two independent sample streams. Build one cascade per lead (see
//! [`Signals::apply_filter`](crate::Signals::apply_filter)).
//!
//! ```rust
//! use ecgio::filter::{Filter, LowpassButterworth};
//!
//! let mut lowpass = LowpassButterworth::new(40.0, 2, 500.0);
//! let mut last = 0.0;
//! for _ in 0..2000 {
//!     last = lowpass.compute(1.0);
//! }
//! assert!((last - 1.0).abs() < 1e-6);
//! ```

use std::f64::consts::PI;

/// A stateful single-input single-output filter.
pub trait Filter {
    fn compute(&mut self, input: f64) -> f64;

    /// Clears the delay lines.
    fn reset(&mut self);

    fn process(&mut self, input: &[f64]) -> Vec<f64> {
        input.iter().map(|&x| self.compute(x)).collect()
    }
}

/// Feed-forward section: `y = Σ a[t] · x[n - t]`.
#[derive(Debug, Clone)]
pub struct FirSection {
    z: Vec<f64>,
}

impl FirSection {
    pub fn new(order: usize) -> Self {
        FirSection { z: vec![0.0; order] }
    }

    /// Inserts `input` as the newest delayed sample, then sums. `coefficients[0]`
    /// pairs with `input` itself.
    pub fn compute(&mut self, input: f64, coefficients: &[f64]) -> f64 {
        if self.z.is_empty() {
            return 0.0;
        }
        self.z.rotate_right(1);
        self.z[0] = input;

        self.z.iter().zip(coefficients).map(|(z, c)| z * c).sum()
    }

    pub fn reset(&mut self) {
        self.z.fill(0.0);
    }
}

/// Feedback section: `y = x + Σ b[t] · y[n - 1 - t]`.
#[derive(Debug, Clone)]
pub struct IirSection {
    z: Vec<f64>,
}

impl IirSection {
    pub fn new(order: usize) -> Self {
        IirSection { z: vec![0.0; order] }
    }

    pub fn compute(&mut self, input: f64, coefficients: &[f64]) -> f64 {
        let output = input
            + self
                .z
                .iter()
                .zip(coefficients)
                .map(|(z, c)| z * c)
                .sum::<f64>();

        if !self.z.is_empty() {
            self.z.rotate_right(1);
            self.z[0] = output;
        }
        output
    }

    pub fn reset(&mut self) {
        self.z.fill(0.0);
    }
}

/// One bilinear-transformed second-order Butterworth stage.
///
/// `compute(x) = IIR(gain · FIR(x, a), b)`.
#[derive(Debug, Clone)]
pub struct ButterworthSection {
    fir: FirSection,
    iir: IirSection,
    a: [f64; 3],
    b: [f64; 2],
    gain: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Lowpass,
    Highpass,
}

impl ButterworthSection {
    /// Section `k` (1-based) of an `n`-pole lowpass with cutoff `cutoff_hz`.
    pub fn lowpass(cutoff_hz: f64, k: usize, n: usize, fs: f64) -> Self {
        Self::design(Band::Lowpass, cutoff_hz, k, n, fs)
    }

    /// Section `k` (1-based) of an `n`-pole highpass with cutoff `cutoff_hz`.
    pub fn highpass(cutoff_hz: f64, k: usize, n: usize, fs: f64) -> Self {
        Self::design(Band::Highpass, cutoff_hz, k, n, fs)
    }

    fn design(band: Band, cutoff_hz: f64, k: usize, n: usize, fs: f64) -> Self {
        // 预畸变的模拟截止频率
        let omegac = 2.0 * fs * (PI * cutoff_hz / fs).tan();
        let zeta = -(PI * (2 * k + n - 1) as f64 / (2 * n) as f64).cos();

        let fs2 = 4.0 * fs * fs;
        let wc2 = omegac * omegac;
        let cross = 4.0 * zeta * omegac * fs;

        // 分母: D0 + D1 z^-1 + D2 z^-2
        let d0 = fs2 + cross + wc2;
        let d1 = 2.0 * wc2 - 2.0 * fs2;
        let d2 = fs2 - cross + wc2;

        let a = match band {
            Band::Lowpass => [wc2, 2.0 * wc2, wc2],
            Band::Highpass => [fs2, -2.0 * fs2, fs2],
        };

        ButterworthSection {
            fir: FirSection::new(3),
            iir: IirSection::new(2),
            a,
            b: [-d1 / d0, -d2 / d0],
            gain: 1.0 / d0,
        }
    }

    pub fn feed_forward(&self) -> &[f64; 3] {
        &self.a
    }

    pub fn feedback(&self) -> &[f64; 2] {
        &self.b
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }
}

impl Filter for ButterworthSection {
    fn compute(&mut self, input: f64) -> f64 {
        let forward = self.fir.compute(input, &self.a);
        self.iir.compute(self.gain * forward, &self.b)
    }

    fn reset(&mut self) {
        self.fir.reset();
        self.iir.reset();
    }
}

/// Sections run in series, output of one feeding the next.
#[derive(Debug, Clone, Default)]
pub struct Cascade {
    sections: Vec<ButterworthSection>,
}

impl Cascade {
    pub fn sections(&self) -> &[ButterworthSection] {
        &self.sections
    }

    fn run(&mut self, input: f64) -> f64 {
        self.sections.iter_mut().fold(input, |x, s| s.compute(x))
    }

    fn clear(&mut self) {
        self.sections.iter_mut().for_each(|s| s.reset());
    }
}

/// Order `2 · num_sections` Butterworth lowpass.
#[derive(Debug, Clone)]
pub struct LowpassButterworth {
    cascade: Cascade,
}

impl LowpassButterworth {
    pub fn new(cutoff_hz: f64, num_sections: usize, fs: f64) -> Self {
        let n = 2 * num_sections;
        let sections = (1..=num_sections)
            .map(|k| ButterworthSection::lowpass(cutoff_hz, k, n, fs))
            .collect();
        LowpassButterworth { cascade: Cascade { sections } }
    }

    pub fn cascade(&self) -> &Cascade {
        &self.cascade
    }
}

impl Filter for LowpassButterworth {
    fn compute(&mut self, input: f64) -> f64 {
        self.cascade.run(input)
    }

    fn reset(&mut self) {
        self.cascade.clear();
    }
}

/// Order `2 · num_sections` Butterworth highpass.
#[derive(Debug, Clone)]
pub struct HighpassButterworth {
    cascade: Cascade,
}

impl HighpassButterworth {
    pub fn new(cutoff_hz: f64, num_sections: usize, fs: f64) -> Self {
        let n = 2 * num_sections;
        let sections = (1..=num_sections)
            .map(|k| ButterworthSection::highpass(cutoff_hz, k, n, fs))
            .collect();
        HighpassButterworth { cascade: Cascade { sections } }
    }

    pub fn cascade(&self) -> &Cascade {
        &self.cascade
    }
}

impl Filter for HighpassButterworth {
    fn compute(&mut self, input: f64) -> f64 {
        self.cascade.run(input)
    }

    fn reset(&mut self) {
        self.cascade.clear();
    }
}

/// Lowpass at `top_hz` followed by highpass at `bottom_hz`.
#[derive(Debug, Clone)]
pub struct Bandpass {
    lowpass: LowpassButterworth,
    highpass: HighpassButterworth,
}

impl Bandpass {
    pub fn new(bottom_hz: f64, top_hz: f64, num_sections: usize, fs: f64) -> Self {
        Bandpass {
            lowpass: LowpassButterworth::new(top_hz, num_sections, fs),
            highpass: HighpassButterworth::new(bottom_hz, num_sections, fs),
        }
    }
}

impl Filter for Bandpass {
    fn compute(&mut self, input: f64) -> f64 {
        let low = self.lowpass.compute(input);
        self.highpass.compute(low)
    }

    fn reset(&mut self) {
        self.lowpass.reset();
        self.highpass.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fir_delay_line() {
        let mut fir = FirSection::new(3);
        let a = [1.0, 10.0, 100.0];
        assert_eq!(fir.compute(1.0, &a), 1.0);
        assert_eq!(fir.compute(2.0, &a), 2.0 + 10.0);
        assert_eq!(fir.compute(3.0, &a), 3.0 + 20.0 + 100.0);
        // 最旧的样本被丢弃
        assert_eq!(fir.compute(0.0, &a), 30.0 + 200.0);
    }

    #[test]
    fn test_iir_feedback() {
        let mut iir = IirSection::new(1);
        let b = [0.5];
        assert_eq!(iir.compute(1.0, &b), 1.0);
        assert_eq!(iir.compute(0.0, &b), 0.5);
        assert_eq!(iir.compute(0.0, &b), 0.25);
    }

    #[test]
    fn test_section_damping_is_positive() {
        let lp = LowpassButterworth::new(40.0, 2, 500.0);
        for s in lp.cascade().sections() {
            let [b1, b2] = *s.feedback();
            // 极点在单位圆内
            assert!(b2.abs() < 1.0);
            assert!(b1.abs() < 1.0 - b2);
        }
    }

    #[test]
    fn test_reset_clears_state() {
        let mut lp = LowpassButterworth::new(40.0, 2, 500.0);
        let first = lp.process(&[1.0, 0.5, -0.25]);
        lp.reset();
        let second = lp.process(&[1.0, 0.5, -0.25]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_highpass_blocks_dc() {
        let mut hp = HighpassButterworth::new(0.5, 1, 500.0);
        let mut last = 1.0;
        for _ in 0..20_000 {
            last = hp.compute(1.0);
        }
        assert!(last.abs() < 1e-3);
    }
}
