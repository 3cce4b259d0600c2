use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::buffered::write_chunked;
use crate::crc::{Crc, CrcAlgorithm};
use crate::error::{EcgError, Result};
use crate::ishne_header::{IshneHeader, BYTES_BEFORE_HEADER, HEADER_SIZE, MAGIC};
use crate::reader::{FormatState, IshneFormat};

/// Seconds of lead data held in memory per write step
const WRITE_CHUNK_SECONDS: usize = 60;

impl IshneFormat {
    /// Writes the complete container to `out`.
    ///
    /// Header offsets are recomputed from the variable block, the CRC is
    /// computed over header plus variable block, and lead data is streamed
    /// one minute at a time. With an AVM override configured every lead is
    /// written at that scale.
    ///
    /// # Errors
    ///
    /// * `EcgError::NotWorking` - no lead data bound
    /// * `EcgError::HeaderInvariantFailed` - header unusable after the offsets are fixed
    /// * `EcgError::WriteTargetUnwritable` - `out` rejected the bytes
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ecgio::{Demographic, IshneFormat};
    ///
    /// let signals = ecgio::doctest_utils::create_test_signals(3, 2000);
    ///
    /// let mut format = IshneFormat::new();
    /// format.set_signals(signals)?;
    /// format.header_mut().set_patient_id("P-001");
    ///
    /// let mut bytes = Vec::new();
    /// format.write(&mut bytes)?;
    /// assert_eq!(&bytes[..8], b"ISHNE1.0");
    /// assert_eq!(bytes.len(), 522 + 3 * 2000 * 2);
    /// # Ok::<(), ecgio::EcgError>(())
    /// ```
    pub fn write<W: Write + ?Sized>(&mut self, out: &mut W) -> Result<()> {
        if self.state != FormatState::SignalsBound || (self.source.is_none() && self.memory.is_none()) {
            return Err(EcgError::NotWorking);
        }

        let preamble = self.encode_preamble()?;
        out.write_all(&preamble)
            .map_err(|e| EcgError::WriteTargetUnwritable(e.to_string()))?;

        let nr_leads = self.header.nr_leads();
        let lead_avms: Vec<f64> = (0..nr_leads).map(|lead| self.header.lead_avm(lead)).collect();
        let nr_samples = self.header.nr_samples();
        let chunk = WRITE_CHUNK_SECONDS * self.header.sample_rate() as usize;

        log::debug!(
            "writing ISHNE container: {} leads, {} samples per lead, {} byte variable block",
            nr_leads,
            nr_samples,
            self.var_block.len()
        );
        write_chunked(self, out, &lead_avms, nr_samples, chunk)?;

        out.flush().map_err(|e| EcgError::WriteTargetUnwritable(e.to_string()))
    }

    /// Creates (or truncates) `path` and writes the container into it.
    pub fn write_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let file = File::create(&path).map_err(|e| {
            EcgError::WriteTargetUnwritable(format!("{}: {}", path.as_ref().display(), e))
        })?;
        let mut writer = BufWriter::new(file);
        self.write(&mut writer)
    }

    /// Magic, CRC, header and variable block with the offsets brought in line.
    ///
    /// The adjusted header replaces the codec's header only once it passes
    /// [`IshneHeader::check`].
    fn encode_preamble(&mut self) -> Result<Vec<u8>> {
        let var_block_size = i32::try_from(self.var_block.len()).map_err(|_| {
            EcgError::HeaderInvariantFailed(format!("variable block of {} bytes", self.var_block.len()))
        })?;
        let mut header = self.header.clone();
        header.var_block_size = var_block_size;
        header.var_block_offset = (BYTES_BEFORE_HEADER + HEADER_SIZE) as i32;
        header.ecg_offset = header.var_block_offset + var_block_size;

        if let Some(avm) = self.config.avm_override {
            let resolution = IshneHeader::resolution_for(avm).ok_or_else(|| {
                EcgError::InvalidConfiguration {
                    key: crate::config::AVM_OVERRIDE.to_string(),
                    value: avm.to_string(),
                }
            })?;
            let nr_leads = header.nr_leads();
            header.ecg_lead_resolution[..nr_leads].fill(resolution);
        }
        header.check().map_err(EcgError::HeaderInvariantFailed)?;

        let total = BYTES_BEFORE_HEADER + HEADER_SIZE + self.var_block.len();
        let mut buffer = vec![0u8; total];
        buffer[..MAGIC.len()].copy_from_slice(MAGIC);
        header.write(&mut buffer, BYTES_BEFORE_HEADER)?;
        buffer[BYTES_BEFORE_HEADER + HEADER_SIZE..].copy_from_slice(&self.var_block);

        // CRC 覆盖头部和可变块
        let crc = Crc::new(CrcAlgorithm::Ccitt).calc(&buffer, BYTES_BEFORE_HEADER, total - BYTES_BEFORE_HEADER);
        buffer[MAGIC.len()..BYTES_BEFORE_HEADER].copy_from_slice(&(crc as u16).to_le_bytes());
        self.header = header;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doctest_utils::create_test_signals;
    use crate::types::Signals;
    use std::io::{self, Cursor};

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_requires_signals() {
        let mut format = IshneFormat::new();
        let mut out = Vec::new();
        assert!(matches!(format.write(&mut out), Err(EcgError::NotWorking)));
        assert!(out.is_empty());
    }

    #[test]
    fn test_offsets_follow_variable_block() {
        let mut format = IshneFormat::new();
        format.set_signals(create_test_signals(1, 10)).unwrap();
        format.set_variable_block(b"recorder notes".to_vec());

        let mut out = Vec::new();
        format.write(&mut out).unwrap();
        assert_eq!(format.header().var_block_size, 14);
        assert_eq!(format.header().ecg_offset, 522 + 14);
        assert_eq!(&out[522..536], b"recorder notes");
        assert_eq!(out.len(), 536 + 20);
    }

    #[test]
    fn test_stored_crc_covers_header_and_block() {
        let mut format = IshneFormat::new();
        format.set_signals(create_test_signals(2, 10)).unwrap();
        format.set_variable_block(vec![7; 5]);
        let mut out = Vec::new();
        format.write(&mut out).unwrap();

        let stored = u16::from_le_bytes([out[8], out[9]]) as u32;
        let expected = Crc::new(CrcAlgorithm::Ccitt).checksum(&out[10..10 + 512 + 5]);
        assert_eq!(stored, expected);
    }

    #[test]
    fn test_unwritable_target() {
        let mut format = IshneFormat::new();
        format.set_signals(create_test_signals(1, 10)).unwrap();
        let err = format.write(&mut FailingSink).unwrap_err();
        assert!(matches!(err, EcgError::WriteTargetUnwritable(_)));
    }

    #[test]
    fn test_failed_write_leaves_header_untouched() {
        let mut format = IshneFormat::new();
        format.set_signals(create_test_signals(2, 10)).unwrap();
        format.set_variable_block(vec![1; 8]);
        format.config_mut().avm_override = Some(2.0);
        format.header_mut().ecg_sample_rate = 0;
        let before = format.header().clone();

        let mut out = Vec::new();
        let err = format.write(&mut out).unwrap_err();
        assert!(matches!(err, EcgError::HeaderInvariantFailed(_)));
        assert!(out.is_empty());
        // 偏移和分辨率都没有被改写
        assert_eq!(format.header(), &before);
        assert_eq!(format.header().var_block_size, 0);
        assert_eq!(format.header().ecg_lead_resolution[0], 1000);
    }

    #[test]
    fn test_rewrite_of_read_container() {
        let mut format = IshneFormat::new();
        format.set_signals(create_test_signals(2, 300)).unwrap();
        let mut first = Vec::new();
        format.write(&mut first).unwrap();

        let mut again = IshneFormat::new();
        again.read(Cursor::new(first.clone()), 0).unwrap();
        let mut second = Vec::new();
        again.write(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_set_signals_rejects_unusable_data() {
        let mut format = IshneFormat::new();
        assert!(format.set_signals(Signals::new(0)).is_err());

        let mut too_many = create_test_signals(1, 10);
        too_many.rhythm_avm = 100.0;
        assert!(matches!(format.set_signals(too_many), Err(EcgError::InvalidSignals(_))));
        assert!(!format.works());
    }
}
