//! Windowed access to lead data.
//!
//! Containers hold recordings far too long to decode at once. A
//! [`BufferedSignalSource`] hands out one window of one lead at a time, and
//! [`write_chunked`] streams any source into the interleaved 16-bit layout
//! chunk by chunk.

use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::bytes::read_stream_exact;
use crate::error::{EcgError, Result};
use crate::types::{LeadType, Signal, Signals};
use crate::utils::rescale_sample;
use crate::LEAD_FAULT_VALUE;

/// Loads lead windows on demand.
pub trait BufferedSignalSource {
    fn nr_leads(&self) -> usize;

    fn lead_type(&self, lead: usize) -> LeadType;

    /// Samples per lead.
    fn rhythm_length(&self) -> usize;

    fn rhythm_samples_per_second(&self) -> u32;

    /// Scale the source prefers to hand samples out in (µV per bit).
    fn default_rhythm_avm(&self) -> f64;

    /// Loads `[start, end)` of `lead`, rescaled to `avm` µV per bit.
    ///
    /// The returned signal owns its samples; its window may be narrower than
    /// requested where the lead has no data.
    fn load_rhythm_signal(&mut self, lead: usize, avm: f64, start: usize, end: usize) -> Result<Signal>;
}

/// Last raw byte window read from a stream.
///
/// A load is served from the cache only when both offset and length equal the
/// cached ones; anything else replaces the cache with exactly one stream read.
#[derive(Debug, Default)]
pub struct WindowCache {
    offset: u64,
    bytes: Vec<u8>,
    valid: bool,
    loads: usize,
}

impl WindowCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matches(&self, offset: u64, length: usize) -> bool {
        self.valid && self.offset == offset && self.bytes.len() == length
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
        self.bytes.clear();
    }

    /// Number of windows actually read from a stream.
    pub fn loads(&self) -> usize {
        self.loads
    }

    /// Returns the bytes `[offset, offset + length)` of `stream`.
    ///
    /// `samples` only labels the error when the stream ends early.
    pub fn load<R: Read + Seek + ?Sized>(
        &mut self,
        stream: &mut R,
        offset: u64,
        length: usize,
        samples: Range<usize>,
    ) -> Result<&[u8]> {
        if !self.matches(offset, length) {
            self.invalidate();
            stream.seek(SeekFrom::Start(offset))?;

            let mut bytes = vec![0u8; length];
            let actual = read_stream_exact(stream, &mut bytes, 0, length);
            self.loads += 1;
            if actual < length {
                return Err(EcgError::SignalWindowTruncated {
                    start: samples.start,
                    end: samples.end,
                    expected: length,
                    actual,
                });
            }

            log::debug!("loaded window {}..{} ({} bytes at {})", samples.start, samples.end, length, offset);
            self.offset = offset;
            self.bytes = bytes;
            self.valid = true;
        }
        Ok(&self.bytes)
    }
}

impl BufferedSignalSource for Signals {
    fn nr_leads(&self) -> usize {
        Signals::nr_leads(self)
    }

    fn lead_type(&self, lead: usize) -> LeadType {
        self.get(lead).map(|s| s.lead_type).unwrap_or_default()
    }

    fn rhythm_length(&self) -> usize {
        self.calculate_start_and_end().1
    }

    fn rhythm_samples_per_second(&self) -> u32 {
        self.rhythm_samples_per_second
    }

    fn default_rhythm_avm(&self) -> f64 {
        self.rhythm_avm
    }

    fn load_rhythm_signal(&mut self, lead: usize, avm: f64, start: usize, end: usize) -> Result<Signal> {
        let from_avm = self.rhythm_avm;
        let signal = self.get(lead).ok_or(EcgError::InvalidLeadIndex(lead))?;
        if !(avm > 0.0) {
            return Err(EcgError::InvalidSignals(format!("amplitude scale {} is not positive", avm)));
        }

        let window_start = start.max(signal.rhythm_start);
        let window_end = end.min(signal.rhythm_end).max(window_start);
        let rhythm = (window_start..window_end)
            .map(|i| {
                let raw = signal.sample_at(i).unwrap_or(LEAD_FAULT_VALUE);
                rescale_sample(raw, from_avm, avm)
            })
            .collect();

        Ok(Signal {
            lead_type: signal.lead_type,
            rhythm_start: window_start,
            rhythm_end: window_end,
            rhythm,
            median: None,
        })
    }
}

/// Writes samples `[start, end)` of `leads` interleaved (sample-major), as
/// little-endian `i16`. Positions outside a lead's window become
/// `LEAD_FAULT_VALUE`.
pub fn write_signal_window<W: Write + ?Sized>(
    out: &mut W,
    leads: &[Signal],
    start: usize,
    end: usize,
) -> Result<()> {
    let mut buffer = Vec::with_capacity(end.saturating_sub(start) * leads.len() * 2);
    for i in start..end {
        for lead in leads {
            let value = lead.sample_at(i).unwrap_or(LEAD_FAULT_VALUE);
            buffer.write_i16::<LittleEndian>(value)?;
        }
    }
    out.write_all(&buffer)
        .map_err(|e| EcgError::WriteTargetUnwritable(e.to_string()))
}

/// Streams `nr_samples` samples of every lead in `chunk`-sized windows.
///
/// Lead `i` is written at `lead_avms[i]` µV per bit; peak memory is bounded
/// by one chunk of all leads.
pub fn write_chunked<S, W>(
    source: &mut S,
    out: &mut W,
    lead_avms: &[f64],
    nr_samples: usize,
    chunk: usize,
) -> Result<()>
where
    S: BufferedSignalSource + ?Sized,
    W: Write + ?Sized,
{
    let chunk = chunk.max(1);
    let mut start = 0;

    while start < nr_samples {
        let end = (start + chunk).min(nr_samples);
        let leads = lead_avms
            .iter()
            .enumerate()
            .map(|(lead, &avm)| source.load_rhythm_signal(lead, avm, start, end))
            .collect::<Result<Vec<_>>>()?;

        log::trace!("writing samples {}..{} of {}", start, end, nr_samples);
        write_signal_window(out, &leads, start, end)?;
        start = end;
    }
    Ok(())
}
