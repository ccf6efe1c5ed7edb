//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the migration orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of workers running at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Stop dequeueing once this many items completed in one run (0 = unlimited).
    /// Running workers still finish.
    #[serde(default)]
    pub max_completed: usize,

    /// How often to log a run summary (milliseconds).
    #[serde(default = "default_summary_interval")]
    pub summary_interval_ms: u64,
}

fn default_concurrency() -> usize {
    2
}

fn default_summary_interval() -> u64 {
    5000 // 5 seconds
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_completed: 0,
            summary_interval_ms: default_summary_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.max_completed, 0);
        assert_eq!(config.summary_interval_ms, 5000);
    }

    #[test]
    fn test_deserialize_minimal() {
        let toml = r#"
            concurrency = 4
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.summary_interval_ms, 5000);
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            concurrency = 1
            max_completed = 10
            summary_interval_ms = 1000
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_completed, 10);
        assert_eq!(config.summary_interval_ms, 1000);
    }
}
