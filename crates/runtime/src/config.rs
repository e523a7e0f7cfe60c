//! Scheduler configuration.
//!
//! # Example
//!
//! ```toml
//! [scheduler]
//! default_throttle = 4
//! max_throttle = 64
//! branches_context_key = "branches_context"
//! branch_result_key = "branch_result"
//! ```
//!
//! Every field is optional. Without a `default_throttle`, loops that
//! declare no throttle expression dispatch all branches in one round.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Pseudo-variable that exposes the collected branch results to publish
/// expressions.
pub const BRANCHES_CONTEXT_KEY: &str = "branches_context";
/// Key under which each branch result map records that branch's own result.
pub const BRANCH_RESULT_KEY: &str = "branch_result";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Throttle applied when the loop statement has no throttle expression.
    #[serde(default)]
    pub default_throttle: Option<NonZeroUsize>,
    /// Upper clamp on any resolved throttle.
    #[serde(default)]
    pub max_throttle: Option<NonZeroUsize>,
    #[serde(default = "default_branches_context_key")]
    pub branches_context_key: String,
    #[serde(default = "default_branch_result_key")]
    pub branch_result_key: String,
}

fn default_branches_context_key() -> String {
    BRANCHES_CONTEXT_KEY.to_string()
}

fn default_branch_result_key() -> String {
    BRANCH_RESULT_KEY.to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_throttle: None,
            max_throttle: None,
            branches_context_key: default_branches_context_key(),
            branch_result_key: default_branch_result_key(),
        }
    }
}

/// On-disk layout: the scheduler settings live under `[scheduler]`.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    scheduler: SchedulerConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl SchedulerConfig {
    /// Read and parse a TOML config file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(file.scheduler)
    }

    /// Apply the default and the clamp to a throttle bound from the loop
    /// statement.
    pub fn effective_throttle(&self, bound: Option<NonZeroUsize>) -> Option<NonZeroUsize> {
        let throttle = bound.or(self.default_throttle);
        match (throttle, self.max_throttle) {
            (Some(t), Some(max)) => Some(t.min(max)),
            (t, _) => t,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = SchedulerConfig::from_toml_str("").unwrap();
        assert_eq!(config, SchedulerConfig::default());
        assert_eq!(config.branches_context_key, "branches_context");
    }

    #[test]
    fn scheduler_table_is_read() {
        let config = SchedulerConfig::from_toml_str(
            "[scheduler]\ndefault_throttle = 4\nmax_throttle = 8\nbranch_result_key = \"lane_result\"\n",
        )
        .unwrap();
        assert_eq!(config.default_throttle, Some(nz(4)));
        assert_eq!(config.max_throttle, Some(nz(8)));
        assert_eq!(config.branch_result_key, "lane_result");
        assert_eq!(config.branches_context_key, "branches_context");
    }

    #[test]
    fn zero_throttle_is_rejected() {
        assert!(SchedulerConfig::from_toml_str("[scheduler]\ndefault_throttle = 0\n").is_err());
    }

    #[test]
    fn effective_throttle_applies_default_then_clamp() {
        let config = SchedulerConfig {
            default_throttle: Some(nz(4)),
            max_throttle: Some(nz(10)),
            ..SchedulerConfig::default()
        };
        assert_eq!(config.effective_throttle(None), Some(nz(4)));
        assert_eq!(config.effective_throttle(Some(nz(50))), Some(nz(10)));
        assert_eq!(config.effective_throttle(Some(nz(3))), Some(nz(3)));
        assert_eq!(SchedulerConfig::default().effective_throttle(None), None);
    }
}
