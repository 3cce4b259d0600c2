//! # ECG container codecs for Rust
//!
//! Reading and writing of ISHNE 1.0 Holter ECG files, plus the building
//! blocks other container codecs share: a declarative binary record codec,
//! table-driven CRC engines and Butterworth filter cascades.
//!
//! ## Quick Start
//!
//! ### Reading an ISHNE file
//!
//! ```rust
//! use ecgio::{BufferedSignalSource, Demographic, IshneFormat, Result};
//!
//! fn main() -> Result<()> {
//!     # ecgio::doctest_utils::create_test_file("holter.ecg", 3, 5000)?;
//!     // Validates magic, header and CRC; lead data stays on disk
//!     let mut format = IshneFormat::open("holter.ecg")?;
//!
//!     let header = format.header();
//!     println!("Patient: {:?}", header.patient_id());
//!     println!("{} leads at {} Hz, {} samples per lead",
//!         header.nr_leads(), header.sample_rate(), header.nr_samples());
//!
//!     // Ten seconds of lead 0 in µV per bit of the finest lead
//!     let avm = format.default_rhythm_avm();
//!     let lead = format.load_rhythm_signal(0, avm, 0, 5000)?;
//!     println!("{}: {} samples", lead.lead_type, lead.rhythm.len());
//!
//!     format.close();
//!     # std::fs::remove_file("holter.ecg").ok();
//!     Ok(())
//! }
//! ```
//!
//! ### Creating an ISHNE file
//!
//! ```rust
//! use ecgio::{Demographic, IshneFormat, LeadType, Result, Sex, Signal, Signals};
//!
//! fn main() -> Result<()> {
//!     let mut signals = Signals::new(2);
//!     signals.rhythm_avm = 2.5;                 // µV per bit
//!     signals.rhythm_samples_per_second = 200;
//!
//!     let lead_i: Vec<i16> = (0..2000).map(|i| ((i % 200) as i16) - 100).collect();
//!     signals.set(0, Signal::with_rhythm(LeadType::I, 0, lead_i));
//!     signals.set(1, Signal::with_rhythm(LeadType::II, 0, vec![0; 2000]));
//!
//!     let mut format = IshneFormat::new();
//!     format.set_signals(signals)?;
//!     format.header_mut().set_last_name("Doe");
//!     format.header_mut().set_sex(Sex::Female);
//!
//!     format.write_file("created.ecg")?;
//!     # std::fs::remove_file("created.ecg").ok();
//!     Ok(())
//! }
//! ```
//!
//! ## Amplitudes and lead faults
//!
//! Samples are 16-bit integers; every signal carries an AVM (amplitude value
//! multiplier) in µV per bit. Rescaling between AVMs rounds and saturates to
//! ±32767, because `-32768` ([`LEAD_FAULT_VALUE`]) marks samples where the
//! lead was disconnected. Fault samples survive rescaling and filtering
//! unchanged.
//!
//! ```rust
//! use ecgio::utils::rescale_sample;
//! use ecgio::LEAD_FAULT_VALUE;
//!
//! assert_eq!(rescale_sample(100, 2.5, 1.0), 250);
//! assert_eq!(rescale_sample(20_000, 2.5, 1.0), 32767);
//! assert_eq!(rescale_sample(LEAD_FAULT_VALUE, 2.5, 1.0), LEAD_FAULT_VALUE);
//! ```
//!
//! ## Format detection
//!
//! [`FormatDispatcher`] probes registered codecs without consuming the input
//! and opens the stream with the first one that accepts it. Errors carry an
//! [`ErrorKind`] so callers can tell "not this format" from "this format but
//! corrupted" from "truncated".

pub mod error;
pub mod bytes;
pub mod record;
pub mod crc;
pub mod filter;
pub mod types;
pub mod utils;
pub mod demographic;
pub mod config;
pub mod buffered;
pub mod ishne_header;
pub mod reader;
pub mod writer;
pub mod format;

#[doc(hidden)]
pub mod doctest_utils; // For internal doctest support

// Re-export main types for convenience
pub use error::{EcgError, ErrorKind, Result};
pub use record::{BinaryRecord, FieldValue, RecordLayout, RecordValue};
pub use crc::{Crc, CrcAlgorithm};
pub use filter::{Bandpass, Filter, HighpassButterworth, LowpassButterworth};
pub use types::{LeadType, Race, Sex, Signal, Signals};
pub use demographic::Demographic;
pub use config::FormatConfig;
pub use buffered::BufferedSignalSource;
pub use ishne_header::{IshneHeader, AMPLITUDE_TO_UV};
pub use reader::{FormatState, IshneFormat, ReadSeek};
pub use format::{EcgFormat, FormatDispatcher, FormatKind};

/// Sample value marking a disconnected lead
pub const LEAD_FAULT_VALUE: i16 = i16::MIN;

/// Library version
///
/// # Examples
///
/// ```rust
/// let version = ecgio::version();
/// assert!(version.contains('.'));
/// ```
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
