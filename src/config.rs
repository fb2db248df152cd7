use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Recursion cap applied to nested script evaluation.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 20;
const DEFAULT_UI_RESOURCE_SCHEME: &str = "chrome";
const DEFAULT_MAX_PENDING_JOBS: usize = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read proxy config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Tunables for an [`ExecutionProxy`](crate::js::ExecutionProxy).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub max_recursion_depth: usize,
    /// QuickJS allocation ceiling in bytes.
    pub memory_limit: Option<usize>,
    pub max_stack_size: Option<usize>,
    /// Upper bound on live wrapper-heap objects. Allocation beyond it fails.
    pub heap_object_limit: Option<usize>,
    /// Scheme whose documents may run script even when scripting is disabled.
    pub ui_resource_scheme: String,
    pub max_pending_jobs: usize,
    pub verify_heap: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            memory_limit: None,
            max_stack_size: None,
            heap_object_limit: None,
            ui_resource_scheme: DEFAULT_UI_RESOURCE_SCHEME.to_string(),
            max_pending_jobs: DEFAULT_MAX_PENDING_JOBS,
            verify_heap: cfg!(debug_assertions),
        }
    }
}

impl ProxyConfig {
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let Some(path) = config_path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "proxy config not found, using defaults");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)?;
        let config: ProxyConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_default() {
        let config = ProxyConfig::load(None).unwrap();
        assert_eq!(config.max_recursion_depth, DEFAULT_MAX_RECURSION_DEPTH);
        assert_eq!(config.ui_resource_scheme, "chrome");
        assert!(config.heap_object_limit.is_none());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ProxyConfig::load(Some(PathBuf::from("/nonexistent/proxy.yaml"))).unwrap();
        assert_eq!(config.max_pending_jobs, DEFAULT_MAX_PENDING_JOBS);
    }

    #[test]
    fn loads_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "max_recursion_depth: 5\nheap_object_limit: 128\nui_resource_scheme: app"
        )
        .unwrap();
        let config = ProxyConfig::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.max_recursion_depth, 5);
        assert_eq!(config.heap_object_limit, Some(128));
        assert_eq!(config.ui_resource_scheme, "app");
        assert_eq!(config.max_pending_jobs, DEFAULT_MAX_PENDING_JOBS);
    }

    #[test]
    fn rejects_malformed_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_recursion_depth: [not a number").unwrap();
        let err = ProxyConfig::load(Some(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }
}
