// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Pipeline description loaded from YAML.
//!
//! ```yaml
//! name: demo
//! source:
//!   fps: 30
//!   num_buffers: 300
//!   is_live: true
//! queue:
//!   max_count: 10
//!   leaky: downstream
//! sink:
//!   max_lateness_ms: 20
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::element_config::{BatcherConfig, QueueConfig, SyncSinkConfig, TestSourceConfig};
use crate::core::error::{Result, StreamError};

/// Layout of a `source -> [batcher] -> [queue] -> sink` pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub name: String,
    pub source: TestSourceConfig,
    /// Insert a batcher after the source.
    pub batcher: Option<BatcherConfig>,
    /// Insert a queue (thread boundary) before the sink.
    pub queue: Option<QueueConfig>,
    pub sink: SyncSinkConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "pipeline".to_string(),
            source: TestSourceConfig::default(),
            batcher: None,
            queue: Some(QueueConfig::default()),
            sink: SyncSinkConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StreamError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            StreamError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;

        tracing::info!("Loaded pipeline config '{}' from {}", config.name, path.display());
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            StreamError::Configuration(format!("Failed to serialize pipeline config: {}", e))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StreamError::Configuration(
                "pipeline name must not be empty".into(),
            ));
        }
        self.source.validate()?;
        if let Some(batcher) = &self.batcher {
            if batcher.target_duration.nseconds() == 0 {
                return Err(StreamError::Configuration(
                    "batcher target_duration_ms must be positive".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::LeakyPolicy;
    use crate::core::time::ClockTime;
    use std::io::Write;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = PipelineConfig::from_yaml_str(
            "name: demo\nsource:\n  fps: 25\n  is_live: true\nqueue:\n  leaky: downstream\n",
        )
        .unwrap();

        assert_eq!(config.name, "demo");
        assert_eq!(config.source.fps, 25.0);
        assert!(config.source.is_live);
        assert_eq!(config.source.payload_size, 1024);
        let queue = config.queue.unwrap();
        assert_eq!(queue.leaky, LeakyPolicy::Downstream);
        assert_eq!(queue.max_count, 200);
        assert!(config.batcher.is_none());
        assert_eq!(config.sink, SyncSinkConfig::default());
    }

    #[test]
    fn test_null_queue_disables_it() {
        let config = PipelineConfig::from_yaml_str("queue: null\n").unwrap();
        assert!(config.queue.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(PipelineConfig::from_yaml_str("source:\n  fps: 0\n").is_err());
        assert!(PipelineConfig::from_yaml_str("batcher:\n  target_duration_ms: 0\n").is_err());
        assert!(PipelineConfig::from_yaml_str("sink: [1, 2]\n").is_err());
    }

    #[test]
    fn test_yaml_round_trip_keeps_millisecond_fields() {
        let config = PipelineConfig {
            batcher: Some(BatcherConfig {
                target_duration: ClockTime::from_mseconds(500),
            }),
            ..Default::default()
        };
        let yaml = config.to_yaml_string().unwrap();
        assert!(yaml.contains("target_duration_ms"));
        assert!(yaml.contains("max_lateness_ms"));
        assert_eq!(PipelineConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name: from-file\nsink:\n  sync: false").unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.name, "from-file");
        assert!(!config.sink.sync);
    }

    #[test]
    fn test_load_missing_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineConfig::load(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, StreamError::Configuration(_)));
    }
}
