//! Academy configuration loading from config.toml
//!
//! The academy's timezone, compensation policy and dispute settings live in a TOML
//! file. Every section and field has a default so a missing file section never
//! blocks start-up.

use crate::errors::{Error, Result};
use chrono::FixedOffset;
use serde::Deserialize;
use std::path::Path;

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerConfig {
    /// Academy identity and locale
    #[serde(default)]
    pub academy: AcademyConfig,
    /// Earning eligibility rules
    #[serde(default)]
    pub compensation: CompensationPolicy,
    /// Dispute audit trail settings
    #[serde(default)]
    pub disputes: DisputeConfig,
}

/// Academy identity and locale
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcademyConfig {
    /// Display name
    pub name: String,
    /// The academy's single currency code; amounts are never converted
    pub currency: String,
    /// UTC offset of the academy, e.g. `"+03:00"`
    pub utc_offset: String,
}

impl Default for AcademyConfig {
    fn default() -> Self {
        Self {
            name: "Academy".to_string(),
            currency: "SAR".to_string(),
            utc_offset: "+00:00".to_string(),
        }
    }
}

impl AcademyConfig {
    /// Parses `utc_offset` into a timezone usable for month bucketing.
    pub fn timezone(&self) -> Result<FixedOffset> {
        self.utc_offset.parse().map_err(|e| Error::Config {
            message: format!("invalid academy.utc_offset {:?}: {e}", self.utc_offset),
        })
    }
}

/// Earning eligibility rules
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompensationPolicy {
    /// Whether trial sessions produce earnings
    pub pay_trial_sessions: bool,
    /// Teacher attendance below this percentage forfeits the earning
    pub min_teacher_attendance_percent: f64,
}

impl Default for CompensationPolicy {
    fn default() -> Self {
        Self {
            pay_trial_sessions: false,
            min_teacher_attendance_percent: 50.0,
        }
    }
}

/// Dispute audit trail settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisputeConfig {
    /// Maximum characters kept in an earning's dispute notes; oldest text is dropped first
    pub notes_char_limit: usize,
}

impl Default for DisputeConfig {
    fn default() -> Self {
        Self {
            notes_char_limit: 2000,
        }
    }
}

/// Loads the ledger configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - The academy offset cannot be parsed
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<LedgerConfig> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path.as_ref().display()),
    })?;

    parse_config(&contents)
}

/// Parses and validates configuration text.
pub fn parse_config(contents: &str) -> Result<LedgerConfig> {
    let config: LedgerConfig = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })?;
    config.academy.timezone()?;

    let threshold = config.compensation.min_teacher_attendance_percent;
    if !(0.0..=100.0).contains(&threshold) {
        return Err(Error::Config {
            message: format!("compensation.min_teacher_attendance_percent out of range: {threshold}"),
        });
    }

    Ok(config)
}

/// Loads configuration from `LEDGER_CONFIG`, or ./config.toml when unset.
/// A missing default file yields the built-in defaults.
pub fn load_default_config() -> Result<LedgerConfig> {
    match std::env::var("LEDGER_CONFIG") {
        Ok(path) => load_config(path),
        Err(_) if Path::new("config.toml").exists() => load_config("config.toml"),
        Err(_) => {
            tracing::warn!("config.toml not found, using built-in defaults");
            Ok(LedgerConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            [academy]
            name = "Noor Academy"
            currency = "SAR"
            utc_offset = "+03:00"

            [compensation]
            pay_trial_sessions = true
            min_teacher_attendance_percent = 60.0

            [disputes]
            notes_char_limit = 500
        "#;

        let config = parse_config(toml_str).unwrap();
        assert_eq!(config.academy.name, "Noor Academy");
        assert_eq!(
            config.academy.timezone().unwrap(),
            FixedOffset::east_opt(3 * 3600).unwrap()
        );
        assert!(config.compensation.pay_trial_sessions);
        assert_eq!(config.compensation.min_teacher_attendance_percent, 60.0);
        assert_eq!(config.disputes.notes_char_limit, 500);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.academy.currency, "SAR");
        assert!(!config.compensation.pay_trial_sessions);
        assert_eq!(config.compensation.min_teacher_attendance_percent, 50.0);
        assert_eq!(config.disputes.notes_char_limit, 2000);
    }

    #[test]
    fn test_invalid_offset_rejected() {
        let result = parse_config("[academy]\nutc_offset = \"Mars/Olympus\"\n");
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let result = parse_config("[compensation]\nmin_teacher_attendance_percent = 150.0\n");
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
