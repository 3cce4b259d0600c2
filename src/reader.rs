use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::buffered::{BufferedSignalSource, WindowCache};
use crate::bytes::read_stream_exact;
use crate::config::FormatConfig;
use crate::crc::{Crc, CrcAlgorithm};
use crate::demographic::Demographic;
use crate::error::{EcgError, Result};
use crate::ishne_header::{IshneHeader, BYTES_BEFORE_HEADER, HEADER_SIZE, MAGIC, MAX_LEADS};
use crate::types::{LeadType, Signal, Signals};
use crate::utils::rescale_sample;

/// A seekable byte stream the codec can keep for lazy reads.
///
/// `Send` so a bound codec can move to a worker thread.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Lifecycle of an [`IshneFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatState {
    Empty,
    HeaderRead,
    Validated,
    /// Header valid and lead data available ("works")
    SignalsBound,
    Error,
}

/// Stream bound by a successful read.
pub(crate) struct StreamSource {
    pub(crate) stream: Box<dyn ReadSeek>,
    /// Position of the magic bytes in the stream
    pub(crate) base: u64,
    pub(crate) nr_leads: usize,
    /// Lead resolutions as stored in the stream
    pub(crate) resolution: [i16; MAX_LEADS],
    pub(crate) cache: WindowCache,
}

/// ISHNE 1.0 Holter container codec.
///
/// A successful [`read`](IshneFormat::read) validates magic, header and CRC,
/// then keeps the stream for windowed lead access; nothing beyond the header
/// is decoded up front.
///
/// # Examples
///
/// ```rust
/// use std::io::Cursor;
/// use ecgio::{BufferedSignalSource, IshneFormat};
///
/// # let bytes = ecgio::doctest_utils::create_test_container(2, 1500)?;
/// let mut format = IshneFormat::new();
/// format.read(Cursor::new(bytes), 0)?;
/// assert!(format.works());
///
/// let header = format.header();
/// println!("{} leads, {} samples per lead at {} Hz",
///     header.nr_leads(), header.nr_samples(), header.sample_rate());
///
/// // Only the first second is decoded
/// let avm = format.default_rhythm_avm();
/// let lead = format.load_rhythm_signal(0, avm, 0, 500)?;
/// assert_eq!(lead.rhythm.len(), 500);
/// # Ok::<(), ecgio::EcgError>(())
/// ```
pub struct IshneFormat {
    pub(crate) config: FormatConfig,
    pub(crate) header: IshneHeader,
    pub(crate) var_block: Vec<u8>,
    pub(crate) state: FormatState,
    pub(crate) last_error: Option<String>,
    pub(crate) source: Option<StreamSource>,
    pub(crate) memory: Option<Signals>,
}

impl Default for IshneFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IshneFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IshneFormat")
            .field("state", &self.state)
            .field("header", &self.header)
            .field("var_block", &self.var_block.len())
            .field("stream_bound", &self.source.is_some())
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl IshneFormat {
    pub fn new() -> Self {
        Self::with_config(FormatConfig::default())
    }

    pub fn with_config(config: FormatConfig) -> Self {
        IshneFormat {
            config,
            header: IshneHeader::empty(),
            var_block: Vec::new(),
            state: FormatState::Empty,
            last_error: None,
            source: None,
            memory: None,
        }
    }

    /// Opens and reads an ISHNE file, keeping it open for windowed reads.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, FormatConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: FormatConfig) -> Result<Self> {
        let mut format = Self::with_config(config);
        format.read_file(path)?;
        Ok(format)
    }

    /// Reads the file at `path`; the file stays open until [`close`](Self::close).
    pub fn read_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let file = File::open(&path).map_err(|e| {
            EcgError::StreamUnreadable(format!("{}: {}", path.as_ref().display(), e))
        })?;
        self.read(BufReader::new(file), 0)
    }

    pub fn config(&self) -> &FormatConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut FormatConfig {
        &mut self.config
    }

    pub fn header(&self) -> &IshneHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut IshneHeader {
        &mut self.header
    }

    pub fn variable_block(&self) -> &[u8] {
        &self.var_block
    }

    pub fn set_variable_block(&mut self, block: Vec<u8>) {
        self.var_block = block;
    }

    pub fn state(&self) -> FormatState {
        self.state
    }

    /// Human readable reason of the last failed read.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn works(&self) -> bool {
        self.state == FormatState::SignalsBound
            && self.header.works()
            && (self.source.is_some() || self.memory.is_some())
    }

    /// Number of signal windows read from the bound stream so far.
    pub fn window_loads(&self) -> usize {
        self.source.as_ref().map_or(0, |s| s.cache.loads())
    }

    /// Releases the bound stream. Lead data set through `set_signals` is kept.
    pub fn close(&mut self) {
        if self.source.take().is_some() && self.memory.is_none() {
            self.state = FormatState::Validated;
        }
    }

    /// Reads the container starting at `offset` and binds `stream` for lead access.
    ///
    /// On failure the codec is left in [`FormatState::Error`], the stream is
    /// dropped and [`last_error`](Self::last_error) describes the cause.
    pub fn read<R: ReadSeek + 'static>(&mut self, stream: R, offset: u64) -> Result<()> {
        self.read_boxed(Box::new(stream), offset)
    }

    pub fn read_boxed(&mut self, stream: Box<dyn ReadSeek>, offset: u64) -> Result<()> {
        self.source = None;
        self.memory = None;
        self.var_block.clear();
        self.header = IshneHeader::empty();
        self.state = FormatState::Empty;
        self.last_error = None;

        match self.read_inner(stream, offset) {
            Ok(()) => Ok(()),
            Err(e) => {
                log::debug!("ISHNE read failed in state {:?}: {}", self.state, e);
                self.state = FormatState::Error;
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn read_inner(&mut self, mut stream: Box<dyn ReadSeek>, offset: u64) -> Result<()> {
        self.config.validate()?;
        stream
            .seek(SeekFrom::Start(offset))
            .map_err(|e| EcgError::StreamUnreadable(e.to_string()))?;

        let preamble = read_preamble(&mut *stream)?;
        self.header = decode_header(&preamble)?;
        self.state = FormatState::HeaderRead;

        self.header.check().map_err(EcgError::HeaderInvariantFailed)?;
        self.var_block = read_var_block(&mut *stream, &self.header)?;
        verify_crc(&preamble, &self.var_block, &self.config)?;
        self.state = FormatState::Validated;

        // 文件比头部声明的更长时，按实际长度推算样本数
        let stream_end = stream.seek(SeekFrom::End(0))?;
        let data_start = offset + self.header.ecg_offset as u64;
        let frame = (self.header.nr_leads() * 2) as u64;
        if stream_end > data_start {
            let available = (stream_end - data_start) / frame;
            if available > self.header.ecg_nr_samples as u64 {
                log::warn!(
                    "header declares {} samples per lead, stream holds {}",
                    self.header.ecg_nr_samples,
                    available
                );
                self.header.ecg_nr_samples = available.min(i32::MAX as u64) as i32;
            }
        }

        self.source = Some(StreamSource {
            stream,
            base: offset,
            nr_leads: self.header.nr_leads(),
            resolution: self.header.ecg_lead_resolution,
            cache: WindowCache::new(),
        });
        self.state = FormatState::SignalsBound;
        Ok(())
    }

    /// Validates magic, header and CRC at `offset` without changing `self` or
    /// the stream position.
    pub fn check_format<R: Read + Seek + ?Sized>(&self, stream: &mut R, offset: u64) -> bool {
        self.probe(stream, offset).is_ok()
    }

    /// Like [`check_format`](Self::check_format) but reports why the check failed.
    pub fn probe<R: Read + Seek + ?Sized>(&self, stream: &mut R, offset: u64) -> Result<()> {
        let position = stream
            .stream_position()
            .map_err(|e| EcgError::StreamUnreadable(e.to_string()))?;

        let result = self.probe_at(stream, offset);

        stream.seek(SeekFrom::Start(position))?;
        result
    }

    fn probe_at<R: Read + Seek + ?Sized>(&self, stream: &mut R, offset: u64) -> Result<()> {
        stream
            .seek(SeekFrom::Start(offset))
            .map_err(|e| EcgError::StreamUnreadable(e.to_string()))?;
        let preamble = read_preamble(stream)?;
        let header = decode_header(&preamble)?;
        header.check().map_err(EcgError::HeaderInvariantFailed)?;
        let var_block = read_var_block(stream, &header)?;
        verify_crc(&preamble, &var_block, &self.config)
    }

    /// The scale all leads are handed out in: the AVM override if configured,
    /// otherwise the finest lead resolution.
    pub fn rhythm_avm(&self) -> f64 {
        match self.config.avm_override {
            Some(avm) => avm,
            None => match &self.memory {
                Some(signals) => signals.rhythm_avm,
                None => self.header.min_avm(),
            },
        }
    }

    /// Loads a window of the lead of type `lead_type`, falling back to channel
    /// `index` when the header holds no such lead.
    pub fn load_lead(
        &mut self,
        lead_type: LeadType,
        index: usize,
        avm: f64,
        start: usize,
        end: usize,
    ) -> Result<Signal> {
        if let Some(signals) = self.memory.as_mut() {
            let lead = match signals.get(index) {
                Some(signal) if signal.lead_type == lead_type => index,
                _ => signals.find(lead_type).unwrap_or(index),
            };
            return signals.load_rhythm_signal(lead, avm, start, end);
        }

        let channel = self.header.channel_for(lead_type, index);
        let nr_samples = self.header.nr_samples();
        let ecg_offset = self.header.ecg_offset as u64;
        let source = self.source.as_mut().ok_or(EcgError::NotWorking)?;
        if channel >= source.nr_leads {
            return Err(EcgError::InvalidLeadIndex(channel));
        }
        if !(avm > 0.0) {
            return Err(EcgError::InvalidSignals(format!("amplitude scale {} is not positive", avm)));
        }

        let end = end.min(nr_samples);
        let start = start.min(end);
        let frame = source.nr_leads * 2;
        let offset = source.base + ecg_offset + (start * frame) as u64;
        let length = (end - start) * frame;
        let from_avm = source.resolution[channel] as f64 * crate::AMPLITUDE_TO_UV;

        let bytes = source.cache.load(&mut *source.stream, offset, length, start..end)?;
        let rhythm = bytes
            .chunks_exact(frame)
            .map(|sample| {
                let raw = LittleEndian::read_i16(&sample[channel * 2..]);
                rescale_sample(raw, from_avm, avm)
            })
            .collect();

        Ok(Signal::with_rhythm(self.header.lead_type(channel), start, rhythm))
    }

    /// All leads over `[start, end)` at [`rhythm_avm`](Self::rhythm_avm).
    pub fn signals_window(&mut self, start: usize, end: usize) -> Result<Signals> {
        if !self.works() {
            return Err(EcgError::NotWorking);
        }
        let avm = self.rhythm_avm();
        let nr_leads = BufferedSignalSource::nr_leads(self);

        let mut signals = Signals::new(nr_leads);
        signals.rhythm_avm = avm;
        signals.rhythm_samples_per_second = self.header.sample_rate();
        for lead in 0..nr_leads {
            let signal = self.load_rhythm_signal(lead, avm, start, end)?;
            signals.set(lead, signal);
        }
        Ok(signals)
    }

    /// The complete recording. Prefer [`signals_window`](Self::signals_window)
    /// for long Holter files.
    pub fn signals(&mut self) -> Result<Signals> {
        let length = self.rhythm_length();
        self.signals_window(0, length)
    }

    /// Replaces the lead data; the header's lead, rate and sample fields follow.
    ///
    /// Demographic fields are kept. A header that was never initialised is
    /// replaced by [`IshneHeader::init`] first.
    pub fn set_signals(&mut self, signals: Signals) -> Result<()> {
        if !signals.works() {
            return Err(EcgError::InvalidSignals("signals are not in a working state".to_string()));
        }
        let nr_leads = signals.nr_leads();
        if nr_leads > MAX_LEADS {
            return Err(EcgError::InvalidSignals(format!(
                "{} leads, ISHNE stores at most {}",
                nr_leads, MAX_LEADS
            )));
        }
        let sample_rate = i16::try_from(signals.rhythm_samples_per_second).map_err(|_| {
            EcgError::InvalidSignals(format!("sample rate {} too high", signals.rhythm_samples_per_second))
        })?;
        let avm = self.config.avm_override.unwrap_or(signals.rhythm_avm);
        let resolution = IshneHeader::resolution_for(avm).ok_or_else(|| {
            EcgError::InvalidSignals(format!("amplitude scale {} µV/bit cannot be stored", avm))
        })?;
        let (_, end) = signals.calculate_start_and_end();
        let nr_samples = i32::try_from(end)
            .map_err(|_| EcgError::InvalidSignals(format!("{} samples per lead is too many", end)))?;

        if matches!(self.state, FormatState::Empty | FormatState::Error) {
            let mut fresh = IshneHeader::init();
            if !fresh.copy_from(&self.header) {
                log::warn!("some demographic fields did not fit the new header");
            }
            self.header = fresh;
        }
        let header = &mut self.header;
        header.ecg_nr_leads = nr_leads as i16;
        header.ecg_nr_samples = nr_samples;
        header.ecg_sample_rate = sample_rate;
        header.ecg_lead_specification = [crate::ishne_header::EMPTY_VALUE; MAX_LEADS];
        header.ecg_lead_quality = [crate::ishne_header::EMPTY_VALUE; MAX_LEADS];
        header.ecg_lead_resolution = [crate::ishne_header::EMPTY_VALUE; MAX_LEADS];
        for (lead, signal) in signals.iter().enumerate() {
            header.ecg_lead_specification[lead] = signal.lead_type.ishne_code();
            header.ecg_lead_quality[lead] = 0;
            header.ecg_lead_resolution[lead] = resolution;
        }

        self.source = None;
        self.memory = Some(signals);
        self.last_error = None;
        self.state = FormatState::SignalsBound;
        Ok(())
    }
}

impl BufferedSignalSource for IshneFormat {
    fn nr_leads(&self) -> usize {
        match &self.memory {
            Some(signals) => signals.nr_leads(),
            None => self.header.nr_leads(),
        }
    }

    fn lead_type(&self, lead: usize) -> LeadType {
        match &self.memory {
            Some(signals) => BufferedSignalSource::lead_type(signals, lead),
            None => self.header.lead_type(lead),
        }
    }

    fn rhythm_length(&self) -> usize {
        self.header.nr_samples()
    }

    fn rhythm_samples_per_second(&self) -> u32 {
        self.header.sample_rate()
    }

    fn default_rhythm_avm(&self) -> f64 {
        self.rhythm_avm()
    }

    fn load_rhythm_signal(&mut self, lead: usize, avm: f64, start: usize, end: usize) -> Result<Signal> {
        if lead >= BufferedSignalSource::nr_leads(self) {
            return Err(EcgError::InvalidLeadIndex(lead));
        }
        let lead_type = BufferedSignalSource::lead_type(self, lead);
        self.load_lead(lead_type, lead, avm, start, end)
    }
}

/// Magic, CRC word and header: the first `BYTES_BEFORE_HEADER + HEADER_SIZE` bytes.
fn read_preamble<R: Read + ?Sized>(stream: &mut R) -> Result<Vec<u8>> {
    let expected = BYTES_BEFORE_HEADER + HEADER_SIZE;
    let mut preamble = vec![0u8; expected];
    let actual = read_stream_exact(stream, &mut preamble, 0, expected);

    if actual < MAGIC.len() || &preamble[..MAGIC.len()] != MAGIC {
        let found = String::from_utf8_lossy(&preamble[..actual.min(MAGIC.len())]).into_owned();
        return Err(EcgError::BadMagic(found));
    }
    if actual < expected {
        return Err(EcgError::HeaderTruncated { expected, actual });
    }
    Ok(preamble)
}

fn decode_header(preamble: &[u8]) -> Result<IshneHeader> {
    IshneHeader::read(preamble, BYTES_BEFORE_HEADER)
        .map_err(|e| EcgError::HeaderMalformed(e.to_string()))
}

fn read_var_block<R: Read + ?Sized>(stream: &mut R, header: &IshneHeader) -> Result<Vec<u8>> {
    let expected = usize::try_from(header.var_block_size).unwrap_or(0);
    let mut block = vec![0u8; expected];
    if expected > 0 {
        let actual = read_stream_exact(stream, &mut block, 0, expected);
        if actual < expected {
            return Err(EcgError::VariableBlockTruncated { expected, actual });
        }
    }
    Ok(block)
}

fn verify_crc(preamble: &[u8], var_block: &[u8], config: &FormatConfig) -> Result<()> {
    if !config.crc_validation {
        log::warn!("ISHNE CRC validation disabled");
        return Ok(());
    }
    let stored = LittleEndian::read_u16(&preamble[MAGIC.len()..BYTES_BEFORE_HEADER]) as u32;

    let mut region = Vec::with_capacity(HEADER_SIZE + var_block.len());
    region.extend_from_slice(&preamble[BYTES_BEFORE_HEADER..]);
    region.extend_from_slice(var_block);
    let computed = Crc::new(CrcAlgorithm::Ccitt).checksum(&region);

    if stored != computed {
        return Err(EcgError::CrcMismatch { stored, computed });
    }
    Ok(())
}
