use ecgio::filter::{Bandpass, ButterworthSection, Filter, HighpassButterworth, LowpassButterworth};
use ecgio::{LeadType, Signal, Signals, LEAD_FAULT_VALUE};
use std::f64::consts::PI;

const FS: f64 = 500.0;

fn sine(freq: f64, amplitude: f64, len: usize) -> Vec<f64> {
    (0..len)
        .map(|i| amplitude * (2.0 * PI * freq * i as f64 / FS).sin())
        .collect()
}

fn peak(samples: &[f64]) -> f64 {
    samples.iter().fold(0.0, |m, v| m.max(v.abs()))
}

#[test]
fn test_lowpass_impulse_response_decays() {
    let mut lowpass = LowpassButterworth::new(40.0, 2, FS);
    let mut input = vec![0.0; 4000];
    input[0] = 1.0;
    let output = lowpass.process(&input);

    assert!(output.iter().all(|v| v.is_finite()));
    assert!(peak(&output) < 1.0);
    assert!(peak(&output[..50]) > 0.01);
    assert!(peak(&output[3000..]) < 1e-9);
}

#[test]
fn test_lowpass_dc_gain_is_one() {
    let mut lowpass = LowpassButterworth::new(40.0, 2, FS);
    let output = lowpass.process(&vec![1.0; 2000]);
    let last = output[output.len() - 1];
    assert!((last - 1.0).abs() < 1e-6, "DC gain {}", last);
}

#[test]
fn test_lowpass_attenuates_above_cutoff() {
    let mut lowpass = LowpassButterworth::new(40.0, 2, FS);
    let output = lowpass.process(&sine(150.0, 1000.0, 3000));
    assert!(peak(&output[1000..]) < 10.0);

    lowpass.reset();
    let output = lowpass.process(&sine(5.0, 1000.0, 3000));
    let passed = peak(&output[1000..]);
    assert!(passed > 990.0 && passed < 1010.0, "5 Hz peak {}", passed);
}

#[test]
fn test_highpass_removes_baseline() {
    let mut highpass = HighpassButterworth::new(1.0, 2, FS);
    let output = highpass.process(&vec![500.0; 5000]);
    assert!(output[4999].abs() < 1e-3);

    highpass.reset();
    let output = highpass.process(&sine(125.0, 1000.0, 3000));
    let passed = peak(&output[1000..]);
    assert!(passed > 990.0 && passed < 1010.0, "125 Hz peak {}", passed);
}

#[test]
fn test_bandpass_keeps_ecg_band() {
    let mut bandpass = Bandpass::new(0.5, 40.0, 2, FS);
    let input: Vec<f64> = sine(10.0, 1000.0, 10_000).iter().map(|v| v + 800.0).collect();
    let output = bandpass.process(&input);

    let settled = &output[8000..];
    let passed = peak(settled);
    assert!(passed > 950.0 && passed < 1050.0, "10 Hz peak {}", passed);
    let mean = settled.iter().sum::<f64>() / settled.len() as f64;
    assert!(mean.abs() < 20.0, "baseline {}", mean);
}

#[test]
fn test_section_coefficients() {
    let section = ButterworthSection::lowpass(40.0, 1, 2, FS);
    let a = section.feed_forward();
    assert_eq!(a[1], 2.0 * a[0]);
    assert_eq!(a[2], a[0]);

    // 直流增益: gain · Σa / (1 - Σb) == 1
    let b = section.feedback();
    let dc = section.gain() * a.iter().sum::<f64>() / (1.0 - b[0] - b[1]);
    assert!((dc - 1.0).abs() < 1e-12);
}

#[test]
fn test_signals_filtered_per_lead() {
    let mut signals = Signals::new(2);
    signals.rhythm_avm = 1.0;
    signals.rhythm_samples_per_second = FS as u32;

    let mut lead: Vec<i16> = vec![1000; 1000];
    lead[500] = LEAD_FAULT_VALUE;
    signals.set(0, Signal::with_rhythm(LeadType::I, 0, lead));
    signals.set(1, Signal::with_rhythm(LeadType::II, 0, vec![-1000; 1000]));

    signals.apply_filter(|| LowpassButterworth::new(40.0, 2, FS));

    let lead0 = &signals.get(0).unwrap().rhythm;
    let lead1 = &signals.get(1).unwrap().rhythm;
    assert_eq!(lead0[500], LEAD_FAULT_VALUE);
    assert_eq!(lead0[999], 1000);
    // 每个导联有自己的滤波器状态
    assert_eq!(lead1[999], -1000);
    assert_eq!(lead0[3], -lead1[3]);
}
