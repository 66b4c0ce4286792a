//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use invoker::RetryPolicy;

/// What happens to the local scope when a loop starts another iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalScopePolicy {
    /// Locals written in one iteration are visible in the next.
    #[default]
    Persist,
    /// Each iteration starts from the locals the loop was entered with.
    ResetPerIteration,
}

/// How a JSON object returned by a service is merged into the scopes.
///
/// Non-JSON responses are recorded in the history but never merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMerge {
    /// The response's `global` and `local` members (when present, each an
    /// object) are merged into the scope of the same name; other members are
    /// ignored. This mirrors the request document.
    #[default]
    Scoped,
    /// The whole response object is merged into the local scope.
    Local,
    /// The whole response object is merged into the global scope.
    Global,
    /// Responses never touch the scopes.
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on the iterations of a single loop entry.
    pub max_loop_iterations: u32,
    pub local_scope: LocalScopePolicy,
    pub response_merge: ResponseMerge,
    /// Operation budget of one expression evaluation.
    pub max_expression_operations: u64,
    /// Retry wrapper applied around the service invoker.
    pub retry: RetryPolicy,
    /// Timeout of a single HTTP service call, in milliseconds.
    pub service_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_loop_iterations: 1000,
            local_scope: LocalScopePolicy::default(),
            response_merge: ResponseMerge::default(),
            max_expression_operations: 10_000,
            retry: RetryPolicy::default(),
            service_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl EngineConfig {
    /// Load a JSON config file; absent fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse { path: display, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_keep_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{ "max_loop_iterations": 5, "local_scope": "reset_per_iteration", "retry": { "max_retries": 2 } }"#,
        )
        .unwrap();

        assert_eq!(config.max_loop_iterations, 5);
        assert_eq!(config.local_scope, LocalScopePolicy::ResetPerIteration);
        assert_eq!(config.response_merge, ResponseMerge::Scoped);
        assert_eq!(config.retry, RetryPolicy { max_retries: 2, base_delay_ms: 100 });
        assert_eq!(config.service_timeout_ms, 30_000);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = EngineConfig::from_file(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
