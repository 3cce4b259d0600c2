//! Container format capability trait and format auto-detection.
//!
//! A conversion front end does not know up front what it was handed. The
//! [`FormatDispatcher`] probes its registered codecs in priority order with
//! side-effect-free `check_format` calls and reads with the first one that
//! accepts the stream.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;
use std::str::FromStr;

use crate::buffered::BufferedSignalSource;
use crate::config::FormatConfig;
use crate::demographic::Demographic;
use crate::error::{EcgError, Result};
use crate::reader::{IshneFormat, ReadSeek};
use crate::types::Signals;

/// ECG container formats a conversion pipeline may encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    Ishne,
    MuseXml,
    Dicom,
    Omron,
    ScpEcg,
}

impl FormatKind {
    pub fn name(self) -> &'static str {
        match self {
            FormatKind::Ishne => "ISHNE",
            FormatKind::MuseXml => "MUSE-XML",
            FormatKind::Dicom => "DICOM",
            FormatKind::Omron => "OMRON",
            FormatKind::ScpEcg => "SCP-ECG",
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FormatKind {
    type Err = EcgError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', '_', ' '], "");
        match normalized.as_str() {
            "ISHNE" => Ok(FormatKind::Ishne),
            "MUSEXML" | "MUSE" => Ok(FormatKind::MuseXml),
            "DICOM" => Ok(FormatKind::Dicom),
            "OMRON" => Ok(FormatKind::Omron),
            "SCPECG" | "SCP" => Ok(FormatKind::ScpEcg),
            _ => Err(EcgError::InvalidConfiguration { key: "Format".to_string(), value: s.to_string() }),
        }
    }
}

/// What every container codec offers a format conversion.
pub trait EcgFormat: Send {
    fn kind(&self) -> FormatKind;

    fn config(&self) -> &FormatConfig;

    fn config_mut(&mut self) -> &mut FormatConfig;

    /// Whether the stream at `offset` is in this format. Never moves the stream.
    fn check_format(&self, stream: &mut dyn ReadSeek, offset: u64) -> bool;

    fn read(&mut self, stream: Box<dyn ReadSeek>, offset: u64) -> Result<()>;

    fn write(&mut self, out: &mut dyn Write) -> Result<()>;

    fn works(&self) -> bool;

    fn demographic(&self) -> &dyn Demographic;

    fn demographic_mut(&mut self) -> &mut dyn Demographic;

    fn signals(&mut self) -> Result<Signals>;

    fn set_signals(&mut self, signals: Signals) -> Result<()>;

    /// Windowed access to the lead data, for codecs that support it.
    fn buffered(&mut self) -> Option<&mut dyn BufferedSignalSource> {
        None
    }

    /// Releases the input stream.
    fn close(&mut self) {}
}

impl EcgFormat for IshneFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::Ishne
    }

    fn config(&self) -> &FormatConfig {
        IshneFormat::config(self)
    }

    fn config_mut(&mut self) -> &mut FormatConfig {
        IshneFormat::config_mut(self)
    }

    fn check_format(&self, stream: &mut dyn ReadSeek, offset: u64) -> bool {
        IshneFormat::check_format(self, stream, offset)
    }

    fn read(&mut self, stream: Box<dyn ReadSeek>, offset: u64) -> Result<()> {
        self.read_boxed(stream, offset)
    }

    fn write(&mut self, out: &mut dyn Write) -> Result<()> {
        IshneFormat::write(self, out)
    }

    fn works(&self) -> bool {
        IshneFormat::works(self)
    }

    fn demographic(&self) -> &dyn Demographic {
        self.header()
    }

    fn demographic_mut(&mut self) -> &mut dyn Demographic {
        self.header_mut()
    }

    fn signals(&mut self) -> Result<Signals> {
        IshneFormat::signals(self)
    }

    fn set_signals(&mut self, signals: Signals) -> Result<()> {
        IshneFormat::set_signals(self, signals)
    }

    fn buffered(&mut self) -> Option<&mut dyn BufferedSignalSource> {
        Some(self)
    }

    fn close(&mut self) {
        IshneFormat::close(self)
    }
}

type Factory = Box<dyn Fn(&FormatConfig) -> Box<dyn EcgFormat> + Send + Sync>;

/// Prioritized list of codec factories.
///
/// # Examples
///
/// ```rust
/// use std::io::Cursor;
/// use ecgio::{EcgFormat, FormatConfig, FormatDispatcher, FormatKind};
///
/// # let bytes = ecgio::doctest_utils::create_test_container(2, 500)?;
/// let dispatcher = FormatDispatcher::new(FormatConfig::default());
/// let mut stream = Cursor::new(bytes);
///
/// assert_eq!(dispatcher.detect(&mut stream, 0), Some(FormatKind::Ishne));
/// assert_eq!(stream.position(), 0);
///
/// let mut format = dispatcher.open(Box::new(stream), 0)?;
/// assert!(format.works());
/// assert_eq!(format.signals()?.nr_leads(), 2);
/// # Ok::<(), ecgio::EcgError>(())
/// ```
pub struct FormatDispatcher {
    config: FormatConfig,
    factories: Vec<(FormatKind, Factory)>,
}

impl fmt::Debug for FormatDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatDispatcher")
            .field("config", &self.config)
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl FormatDispatcher {
    /// A dispatcher that knows the built-in codecs.
    pub fn new(config: FormatConfig) -> Self {
        let mut dispatcher = Self::empty(config);
        dispatcher.register(FormatKind::Ishne, |config| {
            Box::new(IshneFormat::with_config(config.clone()))
        });
        dispatcher
    }

    pub fn empty(config: FormatConfig) -> Self {
        FormatDispatcher { config, factories: Vec::new() }
    }

    pub fn config(&self) -> &FormatConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut FormatConfig {
        &mut self.config
    }

    /// Adds a codec probed after all registered ones.
    pub fn register<F>(&mut self, kind: FormatKind, factory: F)
    where
        F: Fn(&FormatConfig) -> Box<dyn EcgFormat> + Send + Sync + 'static,
    {
        self.factories.push((kind, Box::new(factory)));
    }

    /// Adds a codec probed before all registered ones.
    pub fn register_first<F>(&mut self, kind: FormatKind, factory: F)
    where
        F: Fn(&FormatConfig) -> Box<dyn EcgFormat> + Send + Sync + 'static,
    {
        self.factories.insert(0, (kind, Box::new(factory)));
    }

    /// Registered kinds in probe order.
    pub fn kinds(&self) -> Vec<FormatKind> {
        self.factories.iter().map(|(kind, _)| *kind).collect()
    }

    /// A fresh, empty codec of `kind`, e.g. as a conversion target.
    pub fn create(&self, kind: FormatKind) -> Option<Box<dyn EcgFormat>> {
        self.factories
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, factory)| factory(&self.config))
    }

    /// First kind whose codec accepts the stream at `offset`.
    pub fn detect(&self, stream: &mut dyn ReadSeek, offset: u64) -> Option<FormatKind> {
        for (kind, factory) in &self.factories {
            let codec = factory(&self.config);
            if codec.check_format(stream, offset) {
                log::debug!("stream at offset {} detected as {}", offset, kind);
                return Some(*kind);
            }
            log::debug!("stream at offset {} is not {}", offset, kind);
        }
        None
    }

    /// Reads the stream with the first codec that recognises it.
    pub fn open(&self, mut stream: Box<dyn ReadSeek>, offset: u64) -> Result<Box<dyn EcgFormat>> {
        let kind = self.detect(&mut *stream, offset).ok_or(EcgError::UnknownFormat)?;
        let mut codec = self.create(kind).ok_or(EcgError::UnknownFormat)?;
        codec.read(stream, offset)?;
        Ok(codec)
    }

    pub fn open_file<P: AsRef<Path>>(&self, path: P) -> Result<Box<dyn EcgFormat>> {
        let file = File::open(&path).map_err(|e| {
            EcgError::StreamUnreadable(format!("{}: {}", path.as_ref().display(), e))
        })?;
        self.open(Box::new(BufReader::new(file)), 0)
    }
}

/// Copies demographics and lead data from `source` into `target`.
///
/// Returns `false` when some demographic field could not be stored in the
/// target format; the lead data is converted regardless.
pub fn convert(source: &mut dyn EcgFormat, target: &mut dyn EcgFormat) -> Result<bool> {
    let signals = source.signals()?;
    target.set_signals(signals)?;
    let complete = target.demographic_mut().copy_from(source.demographic());
    if !complete {
        log::warn!("{} could not store every demographic field of {}", target.kind(), source.kind());
    }
    Ok(complete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doctest_utils::create_test_container;
    use crate::error::ErrorKind;
    use std::io::Cursor;

    #[test]
    fn test_kind_names() {
        assert_eq!("scp-ecg".parse::<FormatKind>().unwrap(), FormatKind::ScpEcg);
        assert_eq!("ISHNE".parse::<FormatKind>().unwrap(), FormatKind::Ishne);
        assert_eq!(FormatKind::MuseXml.to_string(), "MUSE-XML");
        assert!("HL7".parse::<FormatKind>().is_err());
    }

    #[test]
    fn test_unknown_stream() {
        let dispatcher = FormatDispatcher::new(FormatConfig::default());
        let mut stream = Cursor::new(vec![0u8; 1024]);
        assert_eq!(dispatcher.detect(&mut stream, 0), None);
        let err = dispatcher.open(Box::new(stream), 0).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::FormatMismatch);
    }

    #[test]
    fn test_empty_dispatcher_knows_nothing() {
        let dispatcher = FormatDispatcher::empty(FormatConfig::default());
        let mut stream = Cursor::new(create_test_container(1, 10).unwrap());
        assert_eq!(dispatcher.detect(&mut stream, 0), None);
        assert!(dispatcher.create(FormatKind::Ishne).is_none());
    }

    #[test]
    fn test_register_first_changes_probe_order() {
        let mut dispatcher = FormatDispatcher::new(FormatConfig::default());
        dispatcher.register_first(FormatKind::ScpEcg, |config| {
            Box::new(IshneFormat::with_config(config.clone()))
        });
        assert_eq!(dispatcher.kinds(), vec![FormatKind::ScpEcg, FormatKind::Ishne]);

        let mut stream = Cursor::new(create_test_container(1, 10).unwrap());
        assert_eq!(dispatcher.detect(&mut stream, 0), Some(FormatKind::ScpEcg));
    }

    #[test]
    fn test_dispatcher_config_reaches_codecs() {
        let mut dispatcher = FormatDispatcher::new(FormatConfig::default());
        dispatcher.config_mut().set(crate::config::CRC_VALIDATION, "false").unwrap();

        let mut bytes = create_test_container(1, 10).unwrap();
        bytes[8] ^= 0xFF;
        let format = dispatcher.open(Box::new(Cursor::new(bytes)), 0).unwrap();
        assert!(!format.config().crc_validation);
        assert!(format.works());
    }

    #[test]
    fn test_convert_between_codecs() {
        let dispatcher = FormatDispatcher::new(FormatConfig::default());
        let mut source = dispatcher
            .open(Box::new(Cursor::new(create_test_container(2, 50).unwrap())), 0)
            .unwrap();
        source.demographic_mut().set_last_name("Doe");

        let mut target = dispatcher.create(FormatKind::Ishne).unwrap();
        assert!(convert(&mut *source, &mut *target).unwrap());
        assert_eq!(target.demographic().last_name(), Some("Doe"));
        assert_eq!(target.signals().unwrap(), source.signals().unwrap());
    }
}
