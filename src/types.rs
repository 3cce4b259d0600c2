use std::fmt;

use crate::filter::Filter;
use crate::utils::{clamp_sample, rescale_sample};
use crate::LEAD_FAULT_VALUE;

/// Anatomical identity of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LeadType {
    #[default]
    Unknown,
    /// Generic bipolar lead
    Bipolar,
    X,
    Y,
    Z,
    I,
    II,
    III,
    AVR,
    AVL,
    AVF,
    V1,
    V2,
    V3,
    V4,
    V5,
    V6,
    ES,
    AS,
    AI,
}

impl LeadType {
    const ALL: [LeadType; 20] = [
        LeadType::Unknown,
        LeadType::Bipolar,
        LeadType::X,
        LeadType::Y,
        LeadType::Z,
        LeadType::I,
        LeadType::II,
        LeadType::III,
        LeadType::AVR,
        LeadType::AVL,
        LeadType::AVF,
        LeadType::V1,
        LeadType::V2,
        LeadType::V3,
        LeadType::V4,
        LeadType::V5,
        LeadType::V6,
        LeadType::ES,
        LeadType::AS,
        LeadType::AI,
    ];

    /// ISHNE lead specification code (0..=19).
    pub fn ishne_code(self) -> i16 {
        Self::ALL.iter().position(|&l| l == self).unwrap_or(0) as i16
    }

    pub fn from_ishne_code(code: i16) -> Option<Self> {
        usize::try_from(code).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn name(self) -> &'static str {
        match self {
            LeadType::Unknown => "Unknown",
            LeadType::Bipolar => "Bipolar",
            LeadType::X => "X",
            LeadType::Y => "Y",
            LeadType::Z => "Z",
            LeadType::I => "I",
            LeadType::II => "II",
            LeadType::III => "III",
            LeadType::AVR => "aVR",
            LeadType::AVL => "aVL",
            LeadType::AVF => "aVF",
            LeadType::V1 => "V1",
            LeadType::V2 => "V2",
            LeadType::V3 => "V3",
            LeadType::V4 => "V4",
            LeadType::V5 => "V5",
            LeadType::V6 => "V6",
            LeadType::ES => "ES",
            LeadType::AS => "AS",
            LeadType::AI => "AI",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.iter().copied().find(|l| l.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for LeadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sex {
    #[default]
    Unspecified,
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Race {
    #[default]
    Unknown,
    Caucasian,
    Black,
    Oriental,
}

/// One lead: a rhythm window `[rhythm_start, rhythm_end)` and an optional median beat.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Signal {
    pub lead_type: LeadType,
    pub rhythm_start: usize,
    pub rhythm_end: usize,
    pub rhythm: Vec<i16>,
    pub median: Option<Vec<i16>>,
}

impl Signal {
    pub fn new(lead_type: LeadType) -> Self {
        Signal { lead_type, ..Default::default() }
    }

    /// A lead whose window starts at `start` and covers all of `rhythm`.
    pub fn with_rhythm(lead_type: LeadType, start: usize, rhythm: Vec<i16>) -> Self {
        Signal {
            lead_type,
            rhythm_start: start,
            rhythm_end: start + rhythm.len(),
            rhythm,
            median: None,
        }
    }

    pub fn rhythm_len(&self) -> usize {
        self.rhythm_end.saturating_sub(self.rhythm_start)
    }

    /// Sample at the absolute position `index`, or `None` outside the window.
    pub fn sample_at(&self, index: usize) -> Option<i16> {
        if index < self.rhythm_start || index >= self.rhythm_end {
            return None;
        }
        self.rhythm.get(index - self.rhythm_start).copied()
    }

    /// Runs the rhythm data through `filter`. Lead fault samples are left as
    /// they are and never fed to the filter.
    pub fn apply_filter(&mut self, filter: &mut dyn Filter) {
        for sample in self.rhythm.iter_mut() {
            if *sample == LEAD_FAULT_VALUE {
                continue;
            }
            *sample = clamp_sample(filter.compute(*sample as f64));
        }
    }
}

/// All leads of one recording plus their shared amplitude scale.
#[derive(Debug, Clone, PartialEq)]
pub struct Signals {
    leads: Vec<Signal>,
    /// µV per bit of the rhythm data
    pub rhythm_avm: f64,
    pub rhythm_samples_per_second: u32,
    /// µV per bit of the median data
    pub median_avm: f64,
    pub median_samples_per_second: u32,
    pub median_length: usize,
}

impl Signals {
    pub fn new(nr_leads: usize) -> Self {
        Signals {
            leads: vec![Signal::default(); nr_leads],
            rhythm_avm: 0.0,
            rhythm_samples_per_second: 0,
            median_avm: 0.0,
            median_samples_per_second: 0,
            median_length: 0,
        }
    }

    pub fn nr_leads(&self) -> usize {
        self.leads.len()
    }

    pub fn get(&self, lead: usize) -> Option<&Signal> {
        self.leads.get(lead)
    }

    pub fn get_mut(&mut self, lead: usize) -> Option<&mut Signal> {
        self.leads.get_mut(lead)
    }

    /// Replaces lead `lead`; returns `false` if the index is out of range.
    pub fn set(&mut self, lead: usize, signal: Signal) -> bool {
        match self.leads.get_mut(lead) {
            Some(slot) => {
                *slot = signal;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signal> {
        self.leads.iter()
    }

    pub fn leads(&self) -> &[Signal] {
        &self.leads
    }

    pub fn find(&self, lead_type: LeadType) -> Option<usize> {
        self.leads.iter().position(|s| s.lead_type == lead_type)
    }

    /// Smallest start and largest end over all leads, `(0, 0)` without leads.
    pub fn calculate_start_and_end(&self) -> (usize, usize) {
        let start = self.leads.iter().map(|s| s.rhythm_start).min().unwrap_or(0);
        let end = self.leads.iter().map(|s| s.rhythm_end).max().unwrap_or(0);
        (start, end)
    }

    pub fn works(&self) -> bool {
        if self.leads.is_empty() || self.rhythm_samples_per_second == 0 {
            return false;
        }
        if !(self.rhythm_avm > 0.0) {
            return false;
        }
        let has_median = self.leads.iter().any(|s| s.median.is_some());
        if has_median && !(self.median_avm > 0.0 && self.median_samples_per_second > 0) {
            return false;
        }

        self.leads.iter().all(|s| {
            s.rhythm_start <= s.rhythm_end
                && s.rhythm.len() == s.rhythm_len()
                && s.median.as_ref().map_or(true, |m| m.len() <= self.median_length)
        })
    }

    /// Rescales all rhythm data to `avm` µV per bit.
    pub fn set_rhythm_avm(&mut self, avm: f64) {
        if !(avm > 0.0) || !(self.rhythm_avm > 0.0) || avm == self.rhythm_avm {
            return;
        }
        let from = self.rhythm_avm;
        for lead in self.leads.iter_mut() {
            for sample in lead.rhythm.iter_mut() {
                *sample = rescale_sample(*sample, from, avm);
            }
        }
        self.rhythm_avm = avm;
    }

    /// Filters every lead with its own filter from `make_filter`.
    pub fn apply_filter<F, M>(&mut self, mut make_filter: M)
    where
        F: Filter,
        M: FnMut() -> F,
    {
        for lead in self.leads.iter_mut() {
            let mut filter = make_filter();
            lead.apply_filter(&mut filter);
        }
    }
}
