//! Worker configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-item worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Scratch space. Each item works under `{temp_dir}/{item_id}`.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Archive entries with this extension are units.
    #[serde(default = "default_unit_extension")]
    pub unit_extension: String,

    /// Keep raw units and segments after upload (debugging).
    #[serde(default)]
    pub keep_temp_files: bool,
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_unit_extension() -> String {
    ".mp4".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            unit_extension: default_unit_extension(),
            keep_temp_files: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.temp_dir, PathBuf::from("temp"));
        assert_eq!(config.unit_extension, ".mp4");
        assert!(!config.keep_temp_files);
    }
}
