//! Patient/recording identity surface shared by all container formats.

use chrono::{NaiveDate, NaiveDateTime};

use crate::types::{Race, Sex};

/// Accessors a format conversion needs from a container's demographic record.
///
/// Setters return `false` when the format cannot store the value (for example a
/// name longer than its fixed-width field).
pub trait Demographic {
    fn patient_id(&self) -> Option<&str>;
    fn first_name(&self) -> Option<&str>;
    fn last_name(&self) -> Option<&str>;
    fn sex(&self) -> Sex;
    fn race(&self) -> Race;
    fn birth_date(&self) -> Option<NaiveDate>;
    /// Start of the recording.
    fn time_acquisition(&self) -> Option<NaiveDateTime>;

    fn set_patient_id(&mut self, id: &str) -> bool;
    fn set_first_name(&mut self, name: &str) -> bool;
    fn set_last_name(&mut self, name: &str) -> bool;
    fn set_sex(&mut self, sex: Sex) -> bool;
    fn set_race(&mut self, race: Race) -> bool;
    fn set_birth_date(&mut self, date: NaiveDate) -> bool;
    fn set_time_acquisition(&mut self, time: NaiveDateTime) -> bool;

    /// Copies every field `other` provides. Returns `false` if any present
    /// field could not be stored.
    fn copy_from(&mut self, other: &dyn Demographic) -> bool {
        let mut ok = true;
        if let Some(id) = other.patient_id() {
            ok &= self.set_patient_id(id);
        }
        if let Some(name) = other.first_name() {
            ok &= self.set_first_name(name);
        }
        if let Some(name) = other.last_name() {
            ok &= self.set_last_name(name);
        }
        ok &= self.set_sex(other.sex());
        ok &= self.set_race(other.race());
        if let Some(date) = other.birth_date() {
            ok &= self.set_birth_date(date);
        }
        if let Some(time) = other.time_acquisition() {
            ok &= self.set_time_acquisition(time);
        }
        ok
    }
}
