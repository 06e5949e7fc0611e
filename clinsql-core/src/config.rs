//! Configuration types
//!
//! Explicit config structs with environment constructors. Validation errors
//! here are the only fatal startup errors the pipeline produces.

use crate::{ConfigError, ConfigError::MissingRequired};
use serde::{Deserialize, Serialize};

/// Model names per pipeline role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub schema_selector: String,
    pub sql_generator: String,
    pub sql_refiner: String,
    pub evaluator: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            schema_selector: "llama-3.3-70b-versatile".to_string(),
            sql_generator: "llama-3.3-70b-versatile".to_string(),
            sql_refiner: "llama-3.3-70b-versatile".to_string(),
            // Faster model for the high-volume evaluation calls.
            evaluator: "llama-3.1-8b-instant".to_string(),
        }
    }
}

/// Token budgets for context construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLimits {
    pub max_schema_tokens: i32,
    pub max_examples_tokens: i32,
    pub total_context_limit: i32,
}

impl Default for TokenLimits {
    fn default() -> Self {
        Self {
            max_schema_tokens: 4000,
            max_examples_tokens: 1500,
            total_context_limit: 8000,
        }
    }
}

/// Agent-level defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub temperature: f32,
    pub max_retries: u32,
    pub top_candidates: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_retries: 3,
            top_candidates: 3,
        }
    }
}

/// Database connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "clinical_trials".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            pool_size: 8,
        }
    }
}

/// Master configuration for a pipeline process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Chat-completion provider API key.
    pub api_key: String,
    /// Provider base URL (OpenAI-compatible chat completions).
    pub base_url: String,
    pub models: ModelConfig,
    pub token_limits: TokenLimits,
    pub agent: AgentConfig,
    pub database: DatabaseConfig,
    pub schema_cache_path: String,
    pub preprocess_cache_path: String,
    /// Hard cap applied by `safe_execute` to statements without a LIMIT.
    pub row_cap: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.groq.com/openai/v1".to_string(),
            models: ModelConfig::default(),
            token_limits: TokenLimits::default(),
            agent: AgentConfig::default(),
            database: DatabaseConfig::default(),
            schema_cache_path: "cache/schema_cache.json".to_string(),
            preprocess_cache_path: "cache/preprocess_cache.bin".to_string(),
            row_cap: 1000,
        }
    }
}

impl PipelineConfig {
    /// Build configuration from `CLINSQL_*` environment variables, falling
    /// back to the documented defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: env_or("CLINSQL_API_KEY", &defaults.api_key),
            base_url: env_or("CLINSQL_BASE_URL", &defaults.base_url),
            models: ModelConfig {
                schema_selector: env_or(
                    "CLINSQL_MODEL_SCHEMA_SELECTOR",
                    &defaults.models.schema_selector,
                ),
                sql_generator: env_or("CLINSQL_MODEL_SQL_GENERATOR", &defaults.models.sql_generator),
                sql_refiner: env_or("CLINSQL_MODEL_SQL_REFINER", &defaults.models.sql_refiner),
                evaluator: env_or("CLINSQL_MODEL_EVALUATOR", &defaults.models.evaluator),
            },
            token_limits: defaults.token_limits,
            agent: defaults.agent,
            database: DatabaseConfig {
                host: env_or("CLINSQL_DB_HOST", &defaults.database.host),
                port: env_parsed("CLINSQL_DB_PORT", defaults.database.port),
                database: env_or("CLINSQL_DB_NAME", &defaults.database.database),
                user: env_or("CLINSQL_DB_USER", &defaults.database.user),
                password: env_or("CLINSQL_DB_PASSWORD", &defaults.database.password),
                pool_size: env_parsed("CLINSQL_DB_POOL_SIZE", defaults.database.pool_size),
            },
            schema_cache_path: env_or("CLINSQL_SCHEMA_CACHE", &defaults.schema_cache_path),
            preprocess_cache_path: env_or(
                "CLINSQL_PREPROCESS_CACHE",
                &defaults.preprocess_cache_path,
            ),
            row_cap: env_parsed("CLINSQL_ROW_CAP", defaults.row_cap),
        }
    }

    /// Validate the configuration. Missing credentials and degenerate
    /// limits are fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(MissingRequired {
                field: "api_key".to_string(),
            });
        }
        if self.database.pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "database.pool_size".to_string(),
                value: "0".to_string(),
                reason: "pool must hold at least one connection".to_string(),
            });
        }
        if self.row_cap == 0 {
            return Err(ConfigError::InvalidValue {
                field: "row_cap".to_string(),
                value: "0".to_string(),
                reason: "row cap must be positive".to_string(),
            });
        }
        if self.token_limits.max_schema_tokens <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "token_limits.max_schema_tokens".to_string(),
                value: self.token_limits.max_schema_tokens.to_string(),
                reason: "schema budget must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_rejects_missing_api_key() {
        let config = PipelineConfig::default();
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingRequired {
                field: "api_key".to_string()
            })
        );
    }

    #[test]
    fn test_config_with_key_validates() {
        let config = PipelineConfig {
            api_key: "gsk-test".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_pool_size_is_invalid() {
        let mut config = PipelineConfig {
            api_key: "gsk-test".to_string(),
            ..Default::default()
        };
        config.database.pool_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_default_budgets_match_documented_values() {
        let limits = TokenLimits::default();
        assert_eq!(limits.max_schema_tokens, 4000);
        assert_eq!(limits.max_examples_tokens, 1500);
        assert_eq!(limits.total_context_limit, 8000);
        assert_eq!(PipelineConfig::default().row_cap, 1000);
    }
}
