use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_MODEL: &str = "mistral";
const DEFAULT_TOKEN_ENCODING: &str = "cl100k_base";
const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the Rusty Digest server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Base URL of the Ollama runtime that generates summaries.
    pub ollama_url: String,
    /// Model identifier passed to the generation backend.
    pub summary_model: String,
    /// Upper bound on tokens per chunk.
    pub chunk_size: usize,
    /// Token encoding (or model name) used for counting.
    pub token_encoding: String,
    /// Optional prompt template file; the built-in template is used when absent.
    pub prompt_template_path: Option<String>,
    /// Timeout applied to each generation call.
    pub generation_timeout_secs: u64,
    /// Timeout applied to the health probe against the generation backend.
    pub health_check_timeout_secs: u64,
    /// Overall timeout for processing one document.
    pub session_timeout_secs: u64,
    /// Keep-alive cadence for connected clients.
    pub heartbeat_interval_secs: u64,
    /// Attempts per chunk before it is recorded as failed.
    pub max_retries: u32,
    /// First backoff delay between generation attempts.
    pub retry_min_backoff_secs: u64,
    /// Ceiling for the exponential backoff delay.
    pub retry_max_backoff_secs: u64,
    /// Memory usage (percent) above which the pipeline reports pressure.
    pub max_memory_percent: f32,
    /// Per-chunk duration assumed before any timings have been observed.
    pub default_chunk_seconds: f64,
    /// Largest decoded document accepted from a client.
    pub max_upload_bytes: usize,
    /// Origins allowed to open sessions from a browser.
    pub cors_origins: Vec<String>,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            summary_model: DEFAULT_MODEL.to_string(),
            chunk_size: 2000,
            token_encoding: DEFAULT_TOKEN_ENCODING.to_string(),
            prompt_template_path: None,
            generation_timeout_secs: 300,
            health_check_timeout_secs: 5,
            session_timeout_secs: 300,
            heartbeat_interval_secs: 5,
            max_retries: 3,
            retry_min_backoff_secs: 4,
            retry_max_backoff_secs: 10,
            max_memory_percent: 90.0,
            default_chunk_seconds: 30.0,
            max_upload_bytes: 50 * 1024 * 1024,
            cors_origins: vec![DEFAULT_CORS_ORIGIN.to_string()],
            server_port: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let chunk_size: usize = parse_or("CHUNK_SIZE", defaults.chunk_size)?;
        if chunk_size == 0 {
            return Err(ConfigError::InvalidValue("CHUNK_SIZE".into()));
        }
        let max_retries: u32 = parse_or("MAX_RETRIES", defaults.max_retries)?;
        if max_retries == 0 {
            return Err(ConfigError::InvalidValue("MAX_RETRIES".into()));
        }

        Ok(Self {
            ollama_url: load_env_optional("OLLAMA_URL").unwrap_or(defaults.ollama_url),
            summary_model: load_env_optional("SUMMARY_MODEL").unwrap_or(defaults.summary_model),
            chunk_size,
            token_encoding: load_env_optional("TOKEN_ENCODING")
                .unwrap_or(defaults.token_encoding),
            prompt_template_path: load_env_optional("PROMPT_TEMPLATE_PATH"),
            generation_timeout_secs: parse_or(
                "GENERATION_TIMEOUT_SECS",
                defaults.generation_timeout_secs,
            )?,
            health_check_timeout_secs: parse_or(
                "HEALTH_CHECK_TIMEOUT_SECS",
                defaults.health_check_timeout_secs,
            )?,
            session_timeout_secs: parse_or("SESSION_TIMEOUT_SECS", defaults.session_timeout_secs)?,
            heartbeat_interval_secs: parse_or(
                "HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval_secs,
            )?
            .max(1),
            max_retries,
            retry_min_backoff_secs: parse_or(
                "RETRY_MIN_BACKOFF_SECS",
                defaults.retry_min_backoff_secs,
            )?,
            retry_max_backoff_secs: parse_or(
                "RETRY_MAX_BACKOFF_SECS",
                defaults.retry_max_backoff_secs,
            )?,
            max_memory_percent: parse_or("MAX_MEMORY_PERCENT", defaults.max_memory_percent)?,
            default_chunk_seconds: parse_or(
                "DEFAULT_CHUNK_SECONDS",
                defaults.default_chunk_seconds,
            )?,
            max_upload_bytes: parse_or("MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            cors_origins: load_env_optional("CORS_ORIGINS")
                .map(|value| parse_list(&value))
                .unwrap_or(defaults.cors_origins),
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        })
    }

    /// Per-call generation timeout.
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    /// Timeout for the generation backend health probe.
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    /// Overall per-document processing timeout.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Interval between keep-alive pings.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        ollama_url = %config.ollama_url,
        model = %config.summary_model,
        chunk_size = config.chunk_size,
        token_encoding = %config.token_encoding,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_list_drops_blank_entries() {
        let origins = parse_list(" http://a.test , ,http://b.test,");
        assert_eq!(origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn parse_or_uses_default_for_missing_variable() {
        let value: u64 = parse_or("RUSTY_DIGEST_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn parse_or_reports_unparseable_value() {
        let key = "RUSTY_DIGEST_TEST_BAD_NUMBER";
        // SAFETY: the key is unique to this test.
        unsafe {
            env::set_var(key, "many");
        }
        let error = parse_or::<usize>(key, 1).unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue(ref name) if name == key));
        assert_eq!(
            error.to_string(),
            "Invalid value for environment variable: RUSTY_DIGEST_TEST_BAD_NUMBER"
        );
    }
}
