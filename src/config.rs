//! Engine configuration, loaded from TOML with environment overrides
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const ENV_ON_INSPECTION_FAIL: &str = "AGRI_ON_INSPECTION_FAIL";

/// What a FAILED inspection does to its trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InspectionFailPolicy {
    /// Park the trade in DISPUTED for an admin to resolve.
    #[default]
    Dispute,
    /// Cancel the trade and return the listing to the market.
    Cancel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub on_inspection_fail: InspectionFailPolicy,
    /// When false an AGREED trade may go straight to logistics.
    #[serde(default = "default_require_inspection")]
    pub require_inspection: bool,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_require_inspection() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            on_inspection_fail: InspectionFailPolicy::default(),
            require_inspection: default_require_inspection(),
            data_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        toml::from_str(contents).map_err(|err| EngineError::InvalidInput(err.to_string()))
    }

    /// Reads the config file at `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(EngineError::StorageUnavailable(err.to_string())),
        }
    }

    pub fn with_env_overrides(self) -> Result<Self, EngineError> {
        match std::env::var(ENV_ON_INSPECTION_FAIL) {
            Ok(raw) => self.with_policy_override(&raw),
            Err(_) => Ok(self),
        }
    }

    fn with_policy_override(mut self, raw: &str) -> Result<Self, EngineError> {
        self.on_inspection_fail = raw.parse()?;
        Ok(self)
    }
}

impl FromStr for InspectionFailPolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DISPUTE" => Ok(InspectionFailPolicy::Dispute),
            "CANCEL" => Ok(InspectionFailPolicy::Cancel),
            other => Err(EngineError::InvalidInput(format!(
                "unknown inspection fail policy {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_dispute_and_require_inspection() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.on_inspection_fail, InspectionFailPolicy::Dispute);
        assert!(config.require_inspection);
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn parses_cancel_policy() {
        let config = EngineConfig::from_toml_str(
            r#"
            on_inspection_fail = "CANCEL"
            require_inspection = false
            data_dir = "/var/lib/agri"
            "#,
        )
        .unwrap();
        assert_eq!(config.on_inspection_fail, InspectionFailPolicy::Cancel);
        assert!(!config.require_inspection);
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/agri")));
    }

    #[test]
    fn rejects_unknown_policy() {
        assert!(EngineConfig::from_toml_str(r#"on_inspection_fail = "REFUND""#).is_err());
        assert!("refund".parse::<InspectionFailPolicy>().is_err());
    }

    #[test]
    fn policy_override_is_case_insensitive() {
        let config = EngineConfig::default().with_policy_override("cancel").unwrap();
        assert_eq!(config.on_inspection_fail, InspectionFailPolicy::Cancel);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert!(config.require_inspection);
    }
}
