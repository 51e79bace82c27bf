//! 配置模块：启动时加载限流、熔断与知识库参数。
//!
//! Startup configuration.
//!
//! Configuration is static: it is read once (YAML string, file, or the file named by
//! `STUDY_COMPANION_CONFIG`) and then handed to the stores it configures. Every
//! section has defaults, so an empty document is a valid configuration.
//!
//! ```yaml
//! rate_limits:
//!   default: { max_requests: 100, window_seconds: 60 }
//!   services:
//!     assemblyai: { max_requests: 10, window_seconds: 60 }
//! circuit_breaker:
//!   failure_threshold: 5
//!   timeout_seconds: 60
//!   overrides:
//!     assemblyai: { failure_threshold: 2, timeout_seconds: 120 }
//! knowledge:
//!   max_context_chars: 1000
//! ```

use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::rate_limiter::RateLimiterConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable naming a YAML configuration file.
pub const CONFIG_ENV: &str = "STUDY_COMPANION_CONFIG";

/// Knowledge retrieval tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Upper bound on the characters of retrieved context placed into a prompt.
    pub max_context_chars: usize,
    /// Documents considered when building prompt context.
    pub context_k: usize,
    /// Documents considered when deriving study recommendations.
    pub recommendation_k: usize,
    /// Seed the built-in study-skills corpus when the store starts empty.
    pub seed_defaults: bool,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            max_context_chars: 1000,
            context_k: 3,
            recommendation_k: 5,
            seed_defaults: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    pub rate_limits: RateLimiterConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub knowledge: KnowledgeConfig,
}

impl StudyConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: StudyConfig = if yaml.trim().is_empty() {
            StudyConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot read config file: {}", e),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("config_loader"),
            )
        })?;
        Self::from_yaml_str(&text)
    }

    /// Load from `STUDY_COMPANION_CONFIG` if set, otherwise use defaults.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => {
                tracing::info!(path = %path, "loading configuration");
                Self::from_path(path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.rate_limits.validate()?;
        self.circuit_breaker.validate()?;
        if self.knowledge.context_k == 0 {
            return Err(Error::validation_with_context(
                "context_k must be at least 1",
                ErrorContext::new()
                    .with_field_path("knowledge.context_k")
                    .with_source("config_loader"),
            ));
        }
        Ok(())
    }
}
