// Internal utilities for documentation tests
// Builds small ISHNE containers so doctests have something to read

use std::path::Path;

use crate::types::{LeadType, Signal, Signals};
use crate::{IshneFormat, Result};

/// Deterministic test leads at 500 Hz, 1 µV per bit.
///
/// Lead `n` is a 2 Hz sawtooth scaled by `n + 1`, so leads are distinguishable.
pub fn create_test_signals(nr_leads: usize, nr_samples: usize) -> Signals {
    let mut signals = Signals::new(nr_leads);
    signals.rhythm_avm = 1.0;
    signals.rhythm_samples_per_second = 500;

    for lead in 0..nr_leads {
        let lead_type = LeadType::from_ishne_code(5 + lead as i16).unwrap_or_default();
        let rhythm = (0..nr_samples)
            .map(|i| ((i % 250) as i16 - 125) * (lead as i16 + 1))
            .collect();
        signals.set(lead, Signal::with_rhythm(lead_type, 0, rhythm));
    }
    signals
}

/// A complete ISHNE container held in memory.
pub fn create_test_container(nr_leads: usize, nr_samples: usize) -> Result<Vec<u8>> {
    let mut format = IshneFormat::new();
    format.set_signals(create_test_signals(nr_leads, nr_samples))?;
    format.header_mut().patient_id = "DOC001".to_string();
    format.header_mut().ecg_recorder = "Test Recorder".to_string();

    let mut bytes = Vec::new();
    format.write(&mut bytes)?;
    Ok(bytes)
}

/// Writes a test container to `path`.
pub fn create_test_file<P: AsRef<Path>>(path: P, nr_leads: usize, nr_samples: usize) -> Result<()> {
    let mut format = IshneFormat::new();
    format.set_signals(create_test_signals(nr_leads, nr_samples))?;
    format.write_file(path)
}
