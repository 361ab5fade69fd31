//! Service configuration, read from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `HOST` / `PORT` | `0.0.0.0` / `8000` |
//! | `WORKING_DIR` | current directory |
//! | `TEMPLATES_PATH` | `{WORKING_DIR}/.judge-adapter/templates.json` |
//! | `VLLM_BASE_URL` | `http://localhost:8080/v1` |
//! | `VLLM_API_KEY` | unset |
//! | `VLLM_TIMEOUT_SECONDS` | `60` |
//! | `VLLM_MAX_RETRIES` | `3` (total attempts) |
//! | `VLLM_RETRY_BACKOFF_MS` | `500` |
//! | `TASK_RETENTION_SECONDS` | `3600` |
//! | `TASK_SWEEP_INTERVAL_SECONDS` | `60` |
//! | `MAX_CONCURRENT_EVALUATIONS` | `16` |
//! | `EVALUATION_QUEUE_CAPACITY` | `1024` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::llm::RetryConfig;
use crate::task::OrchestratorConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}' ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to determine working directory: {0}")]
    WorkingDir(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub working_dir: PathBuf,
    pub templates_path: PathBuf,
    pub backend: BackendConfig,
    pub tasks: TaskConfig,
}

/// Model backend connection settings.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    /// Total attempts per evaluation, including the first.
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub retention: Duration,
    pub sweep_interval: Duration,
    pub max_concurrent: usize,
    pub queue_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let working_dir = match var("WORKING_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir()?,
        };
        let templates_path = var("TEMPLATES_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| working_dir.join(".judge-adapter/templates.json"));

        let base_url = var("VLLM_BASE_URL").unwrap_or_else(|| "http://localhost:8080/v1".to_string());
        if let Err(e) = url::Url::parse(&base_url) {
            return Err(ConfigError::InvalidValue {
                name: "VLLM_BASE_URL",
                value: base_url,
                reason: e.to_string(),
            });
        }

        let backend = BackendConfig {
            base_url,
            api_key: var("VLLM_API_KEY"),
            timeout: Duration::from_secs(positive(&var, "VLLM_TIMEOUT_SECONDS", 60)?),
            max_attempts: positive(&var, "VLLM_MAX_RETRIES", 3)?,
            retry_backoff: Duration::from_millis(parse(&var, "VLLM_RETRY_BACKOFF_MS", 500)?),
        };

        let tasks = TaskConfig {
            retention: Duration::from_secs(parse(&var, "TASK_RETENTION_SECONDS", 3600)?),
            sweep_interval: Duration::from_secs(positive(&var, "TASK_SWEEP_INTERVAL_SECONDS", 60)?),
            max_concurrent: positive(&var, "MAX_CONCURRENT_EVALUATIONS", 16)?,
            queue_capacity: positive(&var, "EVALUATION_QUEUE_CAPACITY", 1024)?,
        };

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse(&var, "PORT", 8000)?,
            working_dir,
            templates_path,
            backend,
            tasks,
        })
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.backend.max_attempts,
            timeout: self.backend.timeout,
            base_delay: self.backend.retry_backoff,
            ..RetryConfig::default()
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            workers: self.tasks.max_concurrent,
            queue_capacity: self.tasks.queue_capacity,
            retention: self.tasks.retention,
            sweep_interval: self.tasks.sweep_interval,
        }
    }
}

fn parse<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            name,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

fn positive<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default + Copy,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let value = parse(var, name, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue {
            name,
            value: var(name).unwrap_or_default(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}
