//! The fixed 512-byte ISHNE header record.
//!
//! The layout is declared once as a [`RecordLayout`] (little-endian, `pack = 1`)
//! and interpreted by the generic record codec. The header doubles as the
//! demographic record of an ISHNE file.

use std::sync::OnceLock;

use chrono::{Local, NaiveDate, NaiveDateTime};

use crate::demographic::Demographic;
use crate::error::{EcgError, Result};
use crate::record::{BinaryRecord, FieldValue, IntKind, RecordLayout, RecordValue, StringPolicy};
use crate::types::{LeadType, Race, Sex};
use crate::utils::{date_from_triple, time_from_triple, triple_from_date, triple_from_time};

/// Magic bytes at the start of every ISHNE file
pub const MAGIC: &[u8; 8] = b"ISHNE1.0";
/// Magic plus the CRC word
pub const BYTES_BEFORE_HEADER: usize = 10;
pub const HEADER_SIZE: usize = 512;
pub const MAX_LEADS: usize = 12;
/// ISHNE marker for "unknown"
pub const EMPTY_VALUE: i16 = -9;
/// Lead resolution is stored in nV per bit
pub const AMPLITUDE_TO_UV: f64 = 0.001;

const FIRST_NAME_LEN: usize = 40;
const LAST_NAME_LEN: usize = 40;
const PATIENT_ID_LEN: usize = 20;
const RECORDER_LEN: usize = 40;
const PROPRIETARY_LEN: usize = 80;
const COPYRIGHT_LEN: usize = 80;
const RESERVED_LEN: usize = 88;

#[derive(Debug, Clone, PartialEq)]
pub struct IshneHeader {
    pub var_block_size: i32,
    /// Samples per lead
    pub ecg_nr_samples: i32,
    pub var_block_offset: i32,
    pub ecg_offset: i32,
    pub file_version: i16,
    pub patient_first_name: String,
    pub patient_last_name: String,
    pub patient_id: String,
    pub patient_sex: i16,
    pub patient_race_code: i16,
    /// day, month, year
    pub patient_birthdate: [i16; 3],
    pub ecg_record_date: [i16; 3],
    pub ecg_file_date: [i16; 3],
    /// hour, minute, second
    pub ecg_record_time: [i16; 3],
    pub ecg_nr_leads: i16,
    pub ecg_lead_specification: [i16; MAX_LEADS],
    pub ecg_lead_quality: [i16; MAX_LEADS],
    /// nV per bit
    pub ecg_lead_resolution: [i16; MAX_LEADS],
    pub pacemaker: i16,
    pub ecg_recorder: String,
    pub ecg_sample_rate: i16,
    pub ecg_proprietary: String,
    pub ecg_copyright: String,
    pub reserved: String,
}

impl Default for IshneHeader {
    fn default() -> Self {
        Self::empty()
    }
}

impl IshneHeader {
    /// Every field set to its sentinel value.
    pub fn empty() -> Self {
        IshneHeader {
            var_block_size: EMPTY_VALUE as i32,
            ecg_nr_samples: EMPTY_VALUE as i32,
            var_block_offset: EMPTY_VALUE as i32,
            ecg_offset: EMPTY_VALUE as i32,
            file_version: EMPTY_VALUE,
            patient_first_name: String::new(),
            patient_last_name: String::new(),
            patient_id: String::new(),
            patient_sex: EMPTY_VALUE,
            patient_race_code: EMPTY_VALUE,
            patient_birthdate: [EMPTY_VALUE; 3],
            ecg_record_date: [EMPTY_VALUE; 3],
            ecg_file_date: [EMPTY_VALUE; 3],
            ecg_record_time: [EMPTY_VALUE; 3],
            ecg_nr_leads: EMPTY_VALUE,
            ecg_lead_specification: [EMPTY_VALUE; MAX_LEADS],
            ecg_lead_quality: [EMPTY_VALUE; MAX_LEADS],
            ecg_lead_resolution: [EMPTY_VALUE; MAX_LEADS],
            pacemaker: EMPTY_VALUE,
            ecg_recorder: String::new(),
            ecg_sample_rate: EMPTY_VALUE,
            ecg_proprietary: String::new(),
            ecg_copyright: String::new(),
            reserved: String::new(),
        }
    }

    /// A fresh header without leads, stamped with the current date and time.
    pub fn init() -> Self {
        let now = Local::now().naive_local();
        let mut header = Self::empty();
        header.var_block_size = 0;
        header.ecg_nr_samples = 0;
        header.var_block_offset = (BYTES_BEFORE_HEADER + HEADER_SIZE) as i32;
        header.ecg_offset = header.var_block_offset;
        header.file_version = 1;
        header.patient_sex = 0;
        header.patient_race_code = 0;
        header.ecg_nr_leads = 0;
        header.pacemaker = 0;
        header.ecg_file_date = triple_from_date(now.date());
        header.ecg_record_date = triple_from_date(now.date());
        header.ecg_record_time = triple_from_time(now.time());
        header
    }

    pub fn layout() -> &'static RecordLayout {
        static LAYOUT: OnceLock<RecordLayout> = OnceLock::new();
        LAYOUT.get_or_init(|| {
            RecordLayout::builder("IshneHeader")
                .pack(1)
                .little_endian(true)
                .int("VarBlockSize", IntKind::I32)
                .int("ECGNrSamples", IntKind::I32)
                .int("VarBlockOffset", IntKind::I32)
                .int("ECGOffset", IntKind::I32)
                .int("FileVersion", IntKind::I16)
                .string("PatientFirstName", FIRST_NAME_LEN, StringPolicy::FixedLength)
                .string("PatientLastName", LAST_NAME_LEN, StringPolicy::FixedLength)
                .string("PatientId", PATIENT_ID_LEN, StringPolicy::FixedLength)
                .int("PatientSex", IntKind::I16)
                .int("PatientRaceCode", IntKind::I16)
                .int_array("PatientBirthdate", IntKind::I16, 3)
                .int_array("ECGRecordDate", IntKind::I16, 3)
                .int_array("ECGFileDate", IntKind::I16, 3)
                .int_array("ECGRecordTime", IntKind::I16, 3)
                .int("ECGNrLeads", IntKind::I16)
                .int_array("ECGLeadSpecification", IntKind::I16, MAX_LEADS)
                .int_array("ECGLeadQuality", IntKind::I16, MAX_LEADS)
                .int_array("ECGLeadResolution", IntKind::I16, MAX_LEADS)
                .int("Pacemaker", IntKind::I16)
                .string("ECGRecorder", RECORDER_LEN, StringPolicy::FixedLength)
                .int("ECGSampleRate", IntKind::I16)
                .string("ECGProprietary", PROPRIETARY_LEN, StringPolicy::FixedLength)
                .string("ECGCopyright", COPYRIGHT_LEN, StringPolicy::FixedLength)
                .string("Reserved", RESERVED_LEN, StringPolicy::FixedLength)
                .build()
        })
    }

    /// Decodes the header from `buffer[offset..offset + HEADER_SIZE]`.
    pub fn read(buffer: &[u8], offset: usize) -> Result<Self> {
        Self::read_from(buffer, offset, HEADER_SIZE)
    }

    /// Encodes the header into `buffer[offset..offset + HEADER_SIZE]`.
    pub fn write(&self, buffer: &mut [u8], offset: usize) -> Result<usize> {
        self.write_to(buffer, offset, HEADER_SIZE)
    }

    pub fn nr_leads(&self) -> usize {
        usize::try_from(self.ecg_nr_leads).unwrap_or(0).min(MAX_LEADS)
    }

    pub fn nr_samples(&self) -> usize {
        usize::try_from(self.ecg_nr_samples).unwrap_or(0)
    }

    pub fn sample_rate(&self) -> u32 {
        u32::try_from(self.ecg_sample_rate).unwrap_or(0)
    }

    pub fn lead_type(&self, lead: usize) -> LeadType {
        self.ecg_lead_specification
            .get(lead)
            .and_then(|&code| LeadType::from_ishne_code(code))
            .unwrap_or_default()
    }

    /// µV per bit of `lead`.
    pub fn lead_avm(&self, lead: usize) -> f64 {
        self.ecg_lead_resolution.get(lead).map_or(0.0, |&r| r as f64 * AMPLITUDE_TO_UV)
    }

    /// Smallest µV per bit over all declared leads, 0 without leads.
    pub fn min_avm(&self) -> f64 {
        let min = (0..self.nr_leads())
            .map(|i| self.lead_avm(i))
            .filter(|&avm| avm > 0.0)
            .fold(f64::INFINITY, f64::min);
        if min.is_finite() { min } else { 0.0 }
    }

    /// Channel holding `lead_type`: `hint` itself if it matches, else the first
    /// matching channel, else `hint`.
    pub fn channel_for(&self, lead_type: LeadType, hint: usize) -> usize {
        let nr_leads = self.nr_leads();
        if hint < nr_leads && self.lead_type(hint) == lead_type {
            return hint;
        }
        (0..nr_leads)
            .find(|&i| self.lead_type(i) == lead_type)
            .unwrap_or(hint)
    }

    /// Converts a µV per bit scale to the nV resolution field.
    pub fn resolution_for(avm: f64) -> Option<i16> {
        let nv = (avm / AMPLITUDE_TO_UV).round();
        (nv >= 1.0 && nv <= i16::MAX as f64).then_some(nv as i16)
    }

    /// Describes the first broken invariant, if any.
    pub fn check(&self) -> std::result::Result<(), String> {
        if self.ecg_nr_samples <= 0 {
            return Err(format!("sample count {} is not positive", self.ecg_nr_samples));
        }
        if self.var_block_size < 0 {
            return Err(format!("variable block size {} is negative", self.var_block_size));
        }
        let expected_var_offset = (BYTES_BEFORE_HEADER + HEADER_SIZE) as i64;
        if self.var_block_offset as i64 != expected_var_offset {
            return Err(format!(
                "variable block offset {} should be {}",
                self.var_block_offset, expected_var_offset
            ));
        }
        let expected_ecg_offset = self.var_block_offset as i64 + self.var_block_size as i64;
        if self.ecg_offset as i64 != expected_ecg_offset {
            return Err(format!(
                "ECG offset {} should be {}",
                self.ecg_offset, expected_ecg_offset
            ));
        }
        if self.ecg_nr_leads < 1 || self.ecg_nr_leads as usize > MAX_LEADS {
            return Err(format!("lead count {} outside 1..={}", self.ecg_nr_leads, MAX_LEADS));
        }
        if self.ecg_sample_rate <= 0 {
            return Err(format!("sample rate {} is not positive", self.ecg_sample_rate));
        }
        for lead in 0..self.nr_leads() {
            if self.ecg_lead_resolution[lead] <= 0 {
                return Err(format!("lead {} resolution {} is not positive", lead, self.ecg_lead_resolution[lead]));
            }
            if !(0..=19).contains(&self.ecg_lead_specification[lead]) {
                return Err(format!("lead {} specification {} outside 0..=19", lead, self.ecg_lead_specification[lead]));
            }
            if !(0..=5).contains(&self.ecg_lead_quality[lead]) {
                return Err(format!("lead {} quality {} outside 0..=5", lead, self.ecg_lead_quality[lead]));
            }
        }
        if date_from_triple(self.ecg_record_date).is_none() {
            return Err(format!("record date {:?} is not set", self.ecg_record_date));
        }
        if date_from_triple(self.ecg_file_date).is_none() {
            return Err(format!("file date {:?} is not set", self.ecg_file_date));
        }
        if time_from_triple(self.ecg_record_time).is_none() {
            return Err(format!("record time {:?} is not set", self.ecg_record_time));
        }
        Ok(())
    }

    pub fn works(&self) -> bool {
        self.check().is_ok()
    }
}

fn text(value: &RecordValue, name: &str) -> Result<String> {
    Ok(value.string(name)?.unwrap_or_default().to_string())
}

fn short(value: &RecordValue, name: &str) -> Result<i16> {
    let v = value.int(name)?;
    i16::try_from(v).map_err(|_| EcgError::RecordField {
        field: name.to_string(),
        reason: format!("{} does not fit i16", v),
    })
}

fn int(value: &RecordValue, name: &str) -> Result<i32> {
    let v = value.int(name)?;
    i32::try_from(v).map_err(|_| EcgError::RecordField {
        field: name.to_string(),
        reason: format!("{} does not fit i32", v),
    })
}

fn shorts<const N: usize>(value: &RecordValue, name: &str) -> Result<[i16; N]> {
    let values = value.ints(name)?;
    let mut out = [0i16; N];
    if values.len() != N {
        return Err(EcgError::RecordField {
            field: name.to_string(),
            reason: format!("expected {} elements, got {}", N, values.len()),
        });
    }
    for (slot, &v) in out.iter_mut().zip(values) {
        *slot = i16::try_from(v).map_err(|_| EcgError::RecordField {
            field: name.to_string(),
            reason: format!("{} does not fit i16", v),
        })?;
    }
    Ok(out)
}

fn opt(s: &str) -> FieldValue {
    FieldValue::Str((!s.is_empty()).then(|| s.to_string()))
}

fn array(values: &[i16]) -> FieldValue {
    FieldValue::IntArray(values.iter().map(|&v| v as i64).collect())
}

impl BinaryRecord for IshneHeader {
    fn layout() -> &'static RecordLayout {
        IshneHeader::layout()
    }

    fn to_record(&self) -> Result<RecordValue> {
        let mut r = IshneHeader::layout().empty_value();
        r.set("VarBlockSize", FieldValue::Int(self.var_block_size as i64))?;
        r.set("ECGNrSamples", FieldValue::Int(self.ecg_nr_samples as i64))?;
        r.set("VarBlockOffset", FieldValue::Int(self.var_block_offset as i64))?;
        r.set("ECGOffset", FieldValue::Int(self.ecg_offset as i64))?;
        r.set("FileVersion", FieldValue::Int(self.file_version as i64))?;
        r.set("PatientFirstName", opt(&self.patient_first_name))?;
        r.set("PatientLastName", opt(&self.patient_last_name))?;
        r.set("PatientId", opt(&self.patient_id))?;
        r.set("PatientSex", FieldValue::Int(self.patient_sex as i64))?;
        r.set("PatientRaceCode", FieldValue::Int(self.patient_race_code as i64))?;
        r.set("PatientBirthdate", array(&self.patient_birthdate))?;
        r.set("ECGRecordDate", array(&self.ecg_record_date))?;
        r.set("ECGFileDate", array(&self.ecg_file_date))?;
        r.set("ECGRecordTime", array(&self.ecg_record_time))?;
        r.set("ECGNrLeads", FieldValue::Int(self.ecg_nr_leads as i64))?;
        r.set("ECGLeadSpecification", array(&self.ecg_lead_specification))?;
        r.set("ECGLeadQuality", array(&self.ecg_lead_quality))?;
        r.set("ECGLeadResolution", array(&self.ecg_lead_resolution))?;
        r.set("Pacemaker", FieldValue::Int(self.pacemaker as i64))?;
        r.set("ECGRecorder", opt(&self.ecg_recorder))?;
        r.set("ECGSampleRate", FieldValue::Int(self.ecg_sample_rate as i64))?;
        r.set("ECGProprietary", opt(&self.ecg_proprietary))?;
        r.set("ECGCopyright", opt(&self.ecg_copyright))?;
        r.set("Reserved", opt(&self.reserved))?;
        Ok(r)
    }

    fn from_record(r: &RecordValue) -> Result<Self> {
        Ok(IshneHeader {
            var_block_size: int(r, "VarBlockSize")?,
            ecg_nr_samples: int(r, "ECGNrSamples")?,
            var_block_offset: int(r, "VarBlockOffset")?,
            ecg_offset: int(r, "ECGOffset")?,
            file_version: short(r, "FileVersion")?,
            patient_first_name: text(r, "PatientFirstName")?,
            patient_last_name: text(r, "PatientLastName")?,
            patient_id: text(r, "PatientId")?,
            patient_sex: short(r, "PatientSex")?,
            patient_race_code: short(r, "PatientRaceCode")?,
            patient_birthdate: shorts(r, "PatientBirthdate")?,
            ecg_record_date: shorts(r, "ECGRecordDate")?,
            ecg_file_date: shorts(r, "ECGFileDate")?,
            ecg_record_time: shorts(r, "ECGRecordTime")?,
            ecg_nr_leads: short(r, "ECGNrLeads")?,
            ecg_lead_specification: shorts(r, "ECGLeadSpecification")?,
            ecg_lead_quality: shorts(r, "ECGLeadQuality")?,
            ecg_lead_resolution: shorts(r, "ECGLeadResolution")?,
            pacemaker: short(r, "Pacemaker")?,
            ecg_recorder: text(r, "ECGRecorder")?,
            ecg_sample_rate: short(r, "ECGSampleRate")?,
            ecg_proprietary: text(r, "ECGProprietary")?,
            ecg_copyright: text(r, "ECGCopyright")?,
            reserved: text(r, "Reserved")?,
        })
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

fn fits(value: &str, max: usize) -> bool {
    value.is_ascii() && value.len() <= max
}

impl Demographic for IshneHeader {
    fn patient_id(&self) -> Option<&str> {
        non_empty(&self.patient_id)
    }

    fn first_name(&self) -> Option<&str> {
        non_empty(&self.patient_first_name)
    }

    fn last_name(&self) -> Option<&str> {
        non_empty(&self.patient_last_name)
    }

    fn sex(&self) -> Sex {
        match self.patient_sex {
            1 => Sex::Male,
            2 => Sex::Female,
            _ => Sex::Unspecified,
        }
    }

    fn race(&self) -> Race {
        match self.patient_race_code {
            1 => Race::Caucasian,
            2 => Race::Black,
            3 => Race::Oriental,
            _ => Race::Unknown,
        }
    }

    fn birth_date(&self) -> Option<NaiveDate> {
        date_from_triple(self.patient_birthdate)
    }

    fn time_acquisition(&self) -> Option<NaiveDateTime> {
        let date = date_from_triple(self.ecg_record_date)?;
        let time = time_from_triple(self.ecg_record_time)?;
        Some(date.and_time(time))
    }

    fn set_patient_id(&mut self, id: &str) -> bool {
        if !fits(id, PATIENT_ID_LEN) {
            return false;
        }
        self.patient_id = id.to_string();
        true
    }

    fn set_first_name(&mut self, name: &str) -> bool {
        if !fits(name, FIRST_NAME_LEN) {
            return false;
        }
        self.patient_first_name = name.to_string();
        true
    }

    fn set_last_name(&mut self, name: &str) -> bool {
        if !fits(name, LAST_NAME_LEN) {
            return false;
        }
        self.patient_last_name = name.to_string();
        true
    }

    fn set_sex(&mut self, sex: Sex) -> bool {
        self.patient_sex = match sex {
            Sex::Unspecified => 0,
            Sex::Male => 1,
            Sex::Female => 2,
        };
        true
    }

    fn set_race(&mut self, race: Race) -> bool {
        self.patient_race_code = match race {
            Race::Unknown => 0,
            Race::Caucasian => 1,
            Race::Black => 2,
            Race::Oriental => 3,
        };
        true
    }

    fn set_birth_date(&mut self, date: NaiveDate) -> bool {
        if i16::try_from(chrono::Datelike::year(&date)).is_err() {
            return false;
        }
        self.patient_birthdate = triple_from_date(date);
        true
    }

    fn set_time_acquisition(&mut self, time: NaiveDateTime) -> bool {
        if i16::try_from(chrono::Datelike::year(&time.date())).is_err() {
            return false;
        }
        self.ecg_record_date = triple_from_date(time.date());
        self.ecg_record_time = triple_from_time(time.time());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn working_header() -> IshneHeader {
        let mut header = IshneHeader::init();
        header.ecg_nr_samples = 500;
        header.ecg_nr_leads = 2;
        header.ecg_sample_rate = 500;
        for lead in 0..2 {
            header.ecg_lead_specification[lead] = LeadType::I.ishne_code() + lead as i16;
            header.ecg_lead_quality[lead] = 0;
            header.ecg_lead_resolution[lead] = 1000;
        }
        header
    }

    #[test]
    fn test_layout_is_512_bytes() {
        let layout = IshneHeader::layout();
        assert_eq!(layout.size_of(&layout.empty_value()).unwrap(), HEADER_SIZE);
        assert_eq!(IshneHeader::empty().encoded_size().unwrap(), HEADER_SIZE);
    }

    #[test]
    fn test_field_offsets() {
        let mut header = working_header();
        header.patient_first_name = "Jane".to_string();
        header.ecg_sample_rate = 0x0102;
        let mut buffer = vec![0u8; HEADER_SIZE];
        header.write(&mut buffer, 0).unwrap();

        assert_eq!(&buffer[4..8], &500i32.to_le_bytes());
        assert_eq!(&buffer[8..12], &522i32.to_le_bytes());
        assert_eq!(&buffer[18..22], b"Jane");
        // ECGSampleRate 位于 ECGRecorder 之后
        assert_eq!(&buffer[262..264], &[0x02, 0x01]);
    }

    #[test]
    fn test_read_back() {
        let mut header = working_header();
        header.patient_id = "P-0042".to_string();
        header.ecg_copyright = "none".to_string();
        header.set_birth_date(NaiveDate::from_ymd_opt(1970, 1, 2).unwrap());

        let mut buffer = vec![0u8; HEADER_SIZE + 4];
        assert_eq!(header.write(&mut buffer, 4).unwrap(), HEADER_SIZE);
        let decoded = IshneHeader::read(&buffer, 4).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.works());
    }

    #[test]
    fn test_empty_and_init() {
        assert!(!IshneHeader::empty().works());
        let init = IshneHeader::init();
        assert!(init.time_acquisition().is_some());
        // 没有导联和样本
        assert!(!init.works());
        assert!(working_header().works());
    }

    #[test]
    fn test_invariants() {
        let mut h = working_header();
        h.ecg_offset += 1;
        assert!(h.check().unwrap_err().contains("ECG offset"));

        let mut h = working_header();
        h.ecg_lead_resolution[1] = 0;
        assert!(!h.works());

        let mut h = working_header();
        h.ecg_lead_specification[0] = 20;
        assert!(!h.works());

        let mut h = working_header();
        h.ecg_lead_quality[1] = 6;
        assert!(!h.works());

        let mut h = working_header();
        h.ecg_record_time = [EMPTY_VALUE; 3];
        assert!(!h.works());

        // 未声明的导联不参与检查
        let mut h = working_header();
        h.ecg_lead_resolution[5] = EMPTY_VALUE;
        assert!(h.works());
    }

    #[test]
    fn test_lead_helpers() {
        let mut h = working_header();
        h.ecg_lead_resolution[1] = 2500;
        assert_eq!(h.lead_type(1), LeadType::II);
        assert_eq!(h.min_avm(), 1.0);
        assert_eq!(h.channel_for(LeadType::II, 0), 1);
        assert_eq!(h.channel_for(LeadType::V5, 1), 1);
        assert_eq!(IshneHeader::resolution_for(2.5), Some(2500));
        assert_eq!(IshneHeader::resolution_for(100.0), None);
    }

    #[test]
    fn test_demographic_setters() {
        let mut h = IshneHeader::init();
        assert!(h.set_last_name("Doe"));
        assert!(!h.set_patient_id("an identifier that is far too long"));
        assert!(h.set_sex(Sex::Female));
        assert_eq!(h.sex(), Sex::Female);
        assert_eq!(h.last_name(), Some("Doe"));
        assert_eq!(h.patient_id(), None);
    }
}
