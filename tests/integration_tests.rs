use ecgio::config::{AVM_OVERRIDE, CRC_VALIDATION};
use ecgio::{
    BufferedSignalSource, Crc, CrcAlgorithm, Demographic, EcgError, EcgFormat, ErrorKind, FormatConfig,
    FormatDispatcher, FormatKind, FormatState, IshneFormat, LeadType, Race, Sex, Signal, Signals,
};
use chrono::NaiveDate;
use std::io::Cursor;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// 导联 0 为上升再下降的斜坡，导联 1 全零
fn ramp() -> Vec<i16> {
    (0i16..250).chain((0i16..250).rev()).collect()
}

fn ramp_signals() -> Signals {
    let mut signals = Signals::new(2);
    signals.rhythm_avm = 1.0;
    signals.rhythm_samples_per_second = 500;
    signals.set(0, Signal::with_rhythm(LeadType::I, 0, ramp()));
    signals.set(1, Signal::with_rhythm(LeadType::II, 0, vec![0; 500]));
    signals
}

fn write_to_vec(format: &mut IshneFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    format.write(&mut bytes).expect("write failed");
    bytes
}

fn ramp_container() -> Vec<u8> {
    let mut format = IshneFormat::new();
    format.set_signals(ramp_signals()).unwrap();
    write_to_vec(&mut format)
}

fn restore_crc(bytes: &mut [u8], var_block_size: usize) {
    let crc = Crc::new(CrcAlgorithm::Ccitt).calc(bytes, 10, 512 + var_block_size) as u16;
    bytes[8..10].copy_from_slice(&crc.to_le_bytes());
}

#[test]
fn test_two_lead_ramp_scenario() {
    init_logger();
    let bytes = ramp_container();
    assert_eq!(bytes.len(), 522 + 2 * 500 * 2);

    let mut format = IshneFormat::new();
    assert!(format.check_format(&mut Cursor::new(bytes.clone()), 0));
    format.read(Cursor::new(bytes.clone()), 0).unwrap();

    assert!(format.works());
    assert_eq!(format.state(), FormatState::SignalsBound);
    let header = format.header();
    assert_eq!(header.ecg_nr_leads, 2);
    assert_eq!(header.ecg_sample_rate, 500);
    assert_eq!(header.ecg_nr_samples, 500);
    assert_eq!(&header.ecg_lead_resolution[..2], &[1000, 1000]);
    assert_eq!(header.lead_type(0), LeadType::I);

    let stored = u16::from_le_bytes([bytes[8], bytes[9]]) as u32;
    assert_eq!(stored, Crc::new(CrcAlgorithm::Ccitt).checksum(&bytes[10..522]));

    let signals = format.signals().unwrap();
    assert_eq!(signals.rhythm_avm, 1.0);
    assert_eq!(signals.get(0).unwrap().rhythm, ramp());
    assert!(signals.get(1).unwrap().rhythm.iter().all(|&v| v == 0));
}

#[test]
fn test_header_round_trip() {
    init_logger();
    let mut format = IshneFormat::new();
    format.set_signals(ramp_signals()).unwrap();
    {
        let header = format.header_mut();
        assert!(header.set_patient_id("HOLTER-17"));
        assert!(header.set_first_name("Jane"));
        assert!(header.set_last_name("Doe"));
        assert!(header.set_sex(Sex::Female));
        assert!(header.set_race(Race::Oriental));
        assert!(header.set_birth_date(NaiveDate::from_ymd_opt(1961, 7, 30).unwrap()));
        header.ecg_recorder = "Recorder 3000".to_string();
        header.pacemaker = 1;
    }
    format.set_variable_block(b"free text notes".to_vec());
    let bytes = write_to_vec(&mut format);
    let written = format.header().clone();

    let mut read = IshneFormat::new();
    read.read(Cursor::new(bytes), 0).unwrap();
    assert_eq!(read.header(), &written);
    assert_eq!(read.variable_block(), b"free text notes");
    assert_eq!(read.header().patient_id(), Some("HOLTER-17"));
    assert_eq!(read.header().race(), Race::Oriental);
    assert_eq!(
        read.header().birth_date(),
        NaiveDate::from_ymd_opt(1961, 7, 30)
    );
    assert_eq!(read.header().time_acquisition(), written.time_acquisition());
}

#[test]
fn test_round_trip_keeps_scale() {
    let mut signals = ramp_signals();
    signals.rhythm_avm = 2.5;

    let mut format = IshneFormat::new();
    format.set_signals(signals.clone()).unwrap();
    assert_eq!(format.header().ecg_lead_resolution[0], 2500);
    let bytes = write_to_vec(&mut format);

    let mut read = IshneFormat::new();
    read.read(Cursor::new(bytes), 0).unwrap();
    let back = read.signals().unwrap();
    assert_eq!(back.rhythm_avm, 2.5);
    assert_eq!(back, signals);
}

#[test]
fn test_per_lead_resolution_renormalized() {
    let mut signals = ramp_signals();
    let doubled: Vec<i16> = (0..500).map(|i| (i % 100) as i16 * 2 - 100).collect();
    signals.set(1, Signal::with_rhythm(LeadType::II, 0, doubled.clone()));

    let mut format = IshneFormat::new();
    format.set_signals(signals).unwrap();
    // 导联 1 以 2 µV/bit 存储
    format.header_mut().ecg_lead_resolution[1] = 2000;
    let bytes = write_to_vec(&mut format);

    let raw = i16::from_le_bytes([bytes[522 + 2 * 2 * 10 + 2], bytes[522 + 2 * 2 * 10 + 3]]);
    assert_eq!(raw, doubled[10] / 2);

    let mut read = IshneFormat::new();
    read.read(Cursor::new(bytes), 0).unwrap();
    assert_eq!(read.default_rhythm_avm(), 1.0);
    let back = read.signals().unwrap();
    assert_eq!(back.get(0).unwrap().rhythm, ramp());
    assert_eq!(back.get(1).unwrap().rhythm, doubled);
}

#[test]
fn test_lead_faults_survive_round_trip() {
    let mut signals = ramp_signals();
    signals.rhythm_avm = 0.5;
    let mut lead = ramp();
    lead[100] = ecgio::LEAD_FAULT_VALUE;
    lead[101] = ecgio::LEAD_FAULT_VALUE;
    signals.set(0, Signal::with_rhythm(LeadType::I, 0, lead.clone()));

    let mut format = IshneFormat::with_config(FormatConfig {
        avm_override: Some(1.0),
        ..FormatConfig::default()
    });
    format.set_signals(signals).unwrap();
    let bytes = write_to_vec(&mut format);

    let mut read = IshneFormat::new();
    read.read(Cursor::new(bytes), 0).unwrap();
    let back = read.load_rhythm_signal(0, 0.5, 95, 105).unwrap();
    assert_eq!(back.rhythm[5], ecgio::LEAD_FAULT_VALUE);
    assert_eq!(back.rhythm[6], ecgio::LEAD_FAULT_VALUE);
    // 0.5 → 1.0 → 0.5 的量化误差
    assert!((back.rhythm[0] - lead[95]).abs() <= 1);
}

#[test]
fn test_bad_magic_rejected() {
    init_logger();
    let mut bytes = ramp_container();
    bytes[..8].copy_from_slice(b"EDF+    ");

    let format = IshneFormat::new();
    let mut cursor = Cursor::new(bytes.clone());
    assert!(!format.check_format(&mut cursor, 0));
    assert_eq!(cursor.position(), 0);

    let mut format = IshneFormat::new();
    let err = format.read(Cursor::new(bytes), 0).unwrap_err();
    assert!(matches!(err, EcgError::BadMagic(_)));
    assert_eq!(err.kind(), ErrorKind::FormatMismatch);
    assert!(!format.works());
    assert!(format.last_error().is_some());
}

#[test]
fn test_corruption_is_not_a_format_mismatch() {
    init_logger();
    let mut bytes = ramp_container();
    // 患者名字段中翻转一位
    bytes[10 + 18] ^= 0x01;

    let format = IshneFormat::new();
    assert!(!format.check_format(&mut Cursor::new(bytes.clone()), 0));

    let mut format = IshneFormat::new();
    let err = format.read(Cursor::new(bytes.clone()), 0).unwrap_err();
    assert!(matches!(err, EcgError::CrcMismatch { .. }));
    assert_eq!(err.kind(), ErrorKind::IntegrityCheckFailure);
    assert_eq!(format.state(), FormatState::Error);

    let mut config = FormatConfig::default();
    config.set(CRC_VALIDATION, "false").unwrap();
    let mut lenient = IshneFormat::with_config(config);
    lenient.read(Cursor::new(bytes), 0).unwrap();
    assert!(lenient.works());
}

#[test]
fn test_stored_crc_corruption() {
    let mut bytes = ramp_container();
    bytes[9] ^= 0x80;
    let mut format = IshneFormat::new();
    let err = format.read(Cursor::new(bytes), 0).unwrap_err();
    match err {
        EcgError::CrcMismatch { stored, computed } => assert_ne!(stored, computed),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_truncated_inputs() {
    let bytes = ramp_container();

    let mut format = IshneFormat::new();
    let err = format.read(Cursor::new(bytes[..300].to_vec()), 0).unwrap_err();
    assert!(matches!(err, EcgError::HeaderTruncated { expected: 522, actual: 300 }));
    assert_eq!(err.kind(), ErrorKind::TruncatedInput);

    let mut with_block = IshneFormat::new();
    with_block.set_signals(ramp_signals()).unwrap();
    with_block.set_variable_block(vec![0xAB; 100]);
    let bytes = write_to_vec(&mut with_block);
    let err = format.read(Cursor::new(bytes[..522 + 40].to_vec()), 0).unwrap_err();
    assert!(matches!(err, EcgError::VariableBlockTruncated { expected: 100, actual: 40 }));
    assert_eq!(err.kind(), ErrorKind::TruncatedInput);
}

#[test]
fn test_truncated_signal_data() {
    let bytes = ramp_container();
    let short = bytes[..bytes.len() - 400].to_vec();

    let mut format = IshneFormat::new();
    format.read(Cursor::new(short), 0).unwrap();
    // 声明的样本数不会因文件变短而减少
    assert_eq!(format.header().nr_samples(), 500);
    assert_eq!(format.load_rhythm_signal(0, 1.0, 0, 100).unwrap().rhythm.len(), 100);

    let err = format.signals().unwrap_err();
    assert!(matches!(err, EcgError::SignalWindowTruncated { start: 0, end: 500, .. }));
    assert_eq!(err.kind(), ErrorKind::TruncatedInput);
}

#[test]
fn test_header_invariant_failure() {
    let mut bytes = ramp_container();
    // ECGNrLeads 位于头部偏移 146
    bytes[10 + 146..10 + 148].copy_from_slice(&13i16.to_le_bytes());
    restore_crc(&mut bytes, 0);

    let mut format = IshneFormat::new();
    let err = format.read(Cursor::new(bytes), 0).unwrap_err();
    assert!(matches!(err, EcgError::HeaderInvariantFailed(ref m) if m.contains("lead count")));
    assert_eq!(err.kind(), ErrorKind::StructuralInvariantViolation);
}

#[test]
fn test_avm_override_on_read() {
    let mut config = FormatConfig::default();
    config.set(AVM_OVERRIDE, "0.5").unwrap();
    let mut format = IshneFormat::with_config(config);
    format.read(Cursor::new(ramp_container()), 0).unwrap();

    let signals = format.signals().unwrap();
    assert_eq!(signals.rhythm_avm, 0.5);
    let expected: Vec<i16> = ramp().iter().map(|v| v * 2).collect();
    assert_eq!(signals.get(0).unwrap().rhythm, expected);
}

#[test]
fn test_avm_override_on_write() {
    let mut config = FormatConfig::default();
    config.set(AVM_OVERRIDE, "2").unwrap();
    let mut format = IshneFormat::with_config(config);
    format.set_signals(ramp_signals()).unwrap();
    let bytes = write_to_vec(&mut format);

    let mut read = IshneFormat::new();
    read.read(Cursor::new(bytes), 0).unwrap();
    assert_eq!(&read.header().ecg_lead_resolution[..2], &[2000, 2000]);
    let lead = read.load_rhythm_signal(0, 2.0, 0, 500).unwrap();
    let expected: Vec<i16> = ramp().iter().map(|&v| (v as f64 / 2.0).round() as i16).collect();
    assert_eq!(lead.rhythm, expected);
}

#[test]
fn test_invalid_configuration() {
    let mut config = FormatConfig::default();
    for value in ["abc", "0", "-2.5", "inf"] {
        let err = config.set(AVM_OVERRIDE, value).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationInvalid);
    }

    // 直接设置的非法值在读取时被拒绝
    let mut format = IshneFormat::with_config(FormatConfig {
        avm_override: Some(-1.0),
        ..FormatConfig::default()
    });
    let err = format.read(Cursor::new(ramp_container()), 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationInvalid);
}

#[test]
fn test_container_at_offset() {
    let mut bytes = vec![0x55u8; 64];
    bytes.extend(ramp_container());

    let format = IshneFormat::new();
    let mut cursor = Cursor::new(bytes.clone());
    cursor.set_position(7);
    assert!(!format.check_format(&mut cursor, 0));
    assert!(format.check_format(&mut cursor, 64));
    assert_eq!(cursor.position(), 7);

    let mut format = IshneFormat::new();
    format.read(Cursor::new(bytes), 64).unwrap();
    assert_eq!(format.header().nr_samples(), 500);
    assert_eq!(format.signals().unwrap(), ramp_signals());
}

#[test]
fn test_dispatcher_detects_ishne() {
    init_logger();
    let dispatcher = FormatDispatcher::new(FormatConfig::default());
    assert_eq!(dispatcher.kinds(), vec![FormatKind::Ishne]);

    let mut cursor = Cursor::new(ramp_container());
    cursor.set_position(33);
    assert_eq!(dispatcher.detect(&mut cursor, 0), Some(FormatKind::Ishne));
    assert_eq!(cursor.position(), 33);

    let mut format = dispatcher.open(Box::new(cursor), 0).unwrap();
    assert_eq!(format.kind(), FormatKind::Ishne);
    assert_eq!(format.signals().unwrap(), ramp_signals());
    let source = format.buffered().unwrap();
    assert_eq!(source.rhythm_length(), 500);
    assert_eq!(source.lead_type(1), LeadType::II);
}

#[test]
fn test_crc32_matches_reference_implementation() {
    let crc = Crc::by_name("CRC-32").unwrap();
    let inputs: [&[u8]; 4] = [b"", b"123456789", b"ISHNE1.0", &[0xFF; 1000]];
    for input in inputs {
        assert_eq!(crc.checksum(input), crc32fast::hash(input));
    }
    assert!(matches!(Crc::by_name("CRC-64"), Err(EcgError::UnknownCrcAlgorithm(_))));
}
