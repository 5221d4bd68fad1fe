//! Migration run configuration.
//!
//! Loaded from the `[migration]` table of a TOML file. Every key is optional.
//!
//! ```toml
//! [migration]
//! workers = 8
//! page_size = 200
//! script_timeout_ms = 500
//! script_fuel = 2000000
//! commit_retries = 5
//! retry_backoff_ms = 50
//! ```

use std::path::Path;
use std::time::Duration;

use morph_script::SandboxLimits;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse migration config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid migration config: {0}")]
    Invalid(String),
}

/// Tuning knobs for one migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationConfig {
    /// Containers migrated concurrently.
    pub workers: usize,
    /// Containers fetched per listing call.
    pub page_size: usize,
    pub script_timeout_ms: u64,
    /// Interpreter steps allowed per script execution.
    pub script_fuel: u64,
    /// Retries of a commit that failed with a transient storage error.
    pub commit_retries: u32,
    /// Delay before the first retry; doubled for each further one.
    pub retry_backoff_ms: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        MigrationConfig {
            workers: 4,
            page_size: 100,
            script_timeout_ms: 1000,
            script_fuel: 1_000_000,
            commit_retries: 3,
            retry_backoff_ms: 25,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    migration: MigrationConfig,
}

impl MigrationConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        file.migration.validate()?;
        Ok(file.migration)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be at least 1".into()));
        }
        if self.script_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "script_timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn sandbox_limits(&self) -> SandboxLimits {
        SandboxLimits {
            timeout: Duration::from_millis(self.script_timeout_ms),
            fuel: self.script_fuel,
            ..SandboxLimits::default()
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        assert_eq!(
            MigrationConfig::from_toml_str("").unwrap(),
            MigrationConfig::default()
        );
    }

    #[test]
    fn partial_table_overrides_only_given_keys() {
        let config = MigrationConfig::from_toml_str(
            "[migration]\nworkers = 8\nscript_timeout_ms = 250\n",
        )
        .unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.script_timeout_ms, 250);
        assert_eq!(config.page_size, 100);
        assert_eq!(config.sandbox_limits().timeout, Duration::from_millis(250));
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = MigrationConfig::from_toml_str("[migration]\nthreads = 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_workers_is_invalid() {
        let err = MigrationConfig::from_toml_str("[migration]\nworkers = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn retry_delay_doubles() {
        let config = MigrationConfig::default();
        assert_eq!(config.retry_delay(0), Duration::from_millis(25));
        assert_eq!(config.retry_delay(1), Duration::from_millis(50));
        assert_eq!(config.retry_delay(3), Duration::from_millis(200));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = MigrationConfig::load(Path::new("/nonexistent/morph.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/morph.toml"));
    }
}
