//! Request processor configuration

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::datastore::DatastoreKind;
use crate::error::{Result, RpError};

/// Configuration of a request processor context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct RpConfig {
    /// Maximum number of live sessions
    pub max_sessions: usize,
    /// How long a session stop waits for in-flight requests before failing
    /// with `Busy`; absent means wait indefinitely
    pub stop_timeout_ms: Option<u64>,
    /// Datastores sessions may bind to
    pub datastores: Vec<DatastoreKind>,
}

impl Default for RpConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1024,
            stop_timeout_ms: None,
            datastores: DatastoreKind::ALL.to_vec(),
        }
    }
}

impl RpConfig {
    /// Load a configuration file (JSON)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: RpConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for inconsistent values
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(RpError::InvalidConfig("max-sessions must be positive".into()));
        }
        if self.datastores.is_empty() {
            return Err(RpError::InvalidConfig(
                "at least one datastore must be enabled".into(),
            ));
        }
        Ok(())
    }

    /// Stop timeout as a duration, if configured
    pub fn stop_timeout(&self) -> Option<Duration> {
        self.stop_timeout_ms.map(Duration::from_millis)
    }
}

impl FromStr for RpConfig {
    type Err = RpError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_json_str(s)
    }
}
