use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};

use crate::LEAD_FAULT_VALUE;

/// Rounds and saturates to the valid sample range.
///
/// The result is never `LEAD_FAULT_VALUE`: -32768 is reserved, so real samples
/// bottom out at -32767.
pub fn clamp_sample(value: f64) -> i16 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(-(i16::MAX as f64), i16::MAX as f64) as i16
}

/// Converts a sample from `from_avm` to `to_avm` µV per bit.
///
/// Lead fault samples pass through unchanged whatever the scales are.
pub fn rescale_sample(value: i16, from_avm: f64, to_avm: f64) -> i16 {
    if value == LEAD_FAULT_VALUE || from_avm == to_avm || !(to_avm > 0.0) {
        return value;
    }
    clamp_sample(value as f64 * (from_avm / to_avm))
}

/// Day/month/year triple to a date; `None` for sentinel or impossible values.
pub fn date_from_triple(triple: [i16; 3]) -> Option<NaiveDate> {
    let [day, month, year] = triple;
    if day <= 0 || month <= 0 || year <= 0 {
        return None;
    }
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
}

pub fn triple_from_date(date: NaiveDate) -> [i16; 3] {
    [date.day() as i16, date.month() as i16, date.year() as i16]
}

/// Hour/minute/second triple to a time.
pub fn time_from_triple(triple: [i16; 3]) -> Option<NaiveTime> {
    let [hour, minute, second] = triple;
    if hour < 0 || minute < 0 || second < 0 {
        return None;
    }
    NaiveTime::from_hms_opt(hour as u32, minute as u32, second as u32)
}

pub fn triple_from_time(time: NaiveTime) -> [i16; 3] {
    [time.hour() as i16, time.minute() as i16, time.second() as i16]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_round_trip() {
        for v in [-32767i16, -1000, -1, 0, 1, 999, 12345] {
            let there = rescale_sample(v, 0.2, 1.0);
            let back = rescale_sample(there, 1.0, 0.2);
            assert!((back as i32 - v as i32).abs() <= 3, "{} -> {} -> {}", v, there, back);
        }
    }

    #[test]
    fn test_fault_passes_through() {
        assert_eq!(rescale_sample(LEAD_FAULT_VALUE, 1.0, 0.001), LEAD_FAULT_VALUE);
        assert_eq!(rescale_sample(LEAD_FAULT_VALUE, 0.5, 7.0), LEAD_FAULT_VALUE);
    }

    #[test]
    fn test_saturation_never_yields_fault() {
        assert_eq!(rescale_sample(-30000, 1.0, 0.1), -32767);
        assert_eq!(rescale_sample(30000, 1.0, 0.1), 32767);
        assert_eq!(clamp_sample(-40000.0), -32767);
    }

    #[test]
    fn test_date_triples() {
        let date = NaiveDate::from_ymd_opt(1990, 3, 15).unwrap();
        assert_eq!(triple_from_date(date), [15, 3, 1990]);
        assert_eq!(date_from_triple([15, 3, 1990]), Some(date));
        assert_eq!(date_from_triple([-9, -9, -9]), None);
        assert_eq!(date_from_triple([31, 2, 2000]), None);

        let time = NaiveTime::from_hms_opt(13, 5, 59).unwrap();
        assert_eq!(time_from_triple(triple_from_time(time)), Some(time));
        assert_eq!(time_from_triple([-9, -9, -9]), None);
    }
}
