use crate::error::{EcgError, Result};

pub const CRC_VALIDATION: &str = "CRC Validation";
pub const AVM_OVERRIDE: &str = "AVM Override";

/// Options a container codec consumes.
///
/// The typed fields can be set directly; [`set`](FormatConfig::set) offers the
/// string key/value surface a conversion front end uses.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatConfig {
    /// Reject files whose stored CRC does not match
    pub crc_validation: bool,
    /// Force one amplitude scale (µV per bit) for reading and writing
    pub avm_override: Option<f64>,
}

impl Default for FormatConfig {
    fn default() -> Self {
        FormatConfig { crc_validation: true, avm_override: None }
    }
}

fn invalid(key: &str, value: &str) -> EcgError {
    EcgError::InvalidConfiguration { key: key.to_string(), value: value.to_string() }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

impl FormatConfig {
    pub fn keys() -> &'static [&'static str] {
        &[CRC_VALIDATION, AVM_OVERRIDE]
    }

    /// Sets an option by name. An empty AVM value clears the override.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            CRC_VALIDATION => {
                self.crc_validation = parse_bool(key, value)?;
            }
            AVM_OVERRIDE => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    self.avm_override = None;
                    return Ok(());
                }
                let avm: f64 = trimmed.parse().map_err(|_| invalid(key, value))?;
                if !avm.is_finite() || avm <= 0.0 {
                    return Err(invalid(key, value));
                }
                self.avm_override = Some(avm);
            }
            _ => return Err(invalid(key, value)),
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            CRC_VALIDATION => Some(self.crc_validation.to_string()),
            AVM_OVERRIDE => Some(self.avm_override.map(|v| v.to_string()).unwrap_or_default()),
            _ => None,
        }
    }

    /// Checks the typed fields.
    pub fn validate(&self) -> Result<()> {
        match self.avm_override {
            Some(avm) if !avm.is_finite() || avm <= 0.0 => Err(invalid(AVM_OVERRIDE, &avm.to_string())),
            _ => Ok(()),
        }
    }
}
