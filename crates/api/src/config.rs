//! HTTP server settings for the job API.

use std::time::Duration;

use axum::http::HeaderValue;
use batchforge_core::config::env_or;
use batchforge_core::error::CoreError;

/// Browser origins allowed to submit and poll jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    /// `CORS_ORIGINS=*`
    Any,
    List(Vec<HeaderValue>),
}

impl CorsOrigins {
    /// Parse `*` or a comma-separated origin list.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let raw = raw.trim();
        if raw == "*" {
            return Ok(Self::Any);
        }
        raw.split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(|origin| {
                HeaderValue::from_str(origin).map_err(|_| {
                    CoreError::Validation(format!("CORS_ORIGINS has an invalid origin: '{origin}'"))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self::List)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: CorsOrigins,
    /// How long a browser may reuse a preflight while it polls a job.
    pub cors_max_age: Duration,
    /// Per-request deadline. A submission enqueues every unit before it
    /// replies, so this also bounds the largest batch that can be accepted.
    pub request_timeout: Duration,
    /// Time allowed for in-flight requests after a shutdown signal.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origins: CorsOrigins::List(vec![HeaderValue::from_static(
                "http://localhost:5173",
            )]),
            cors_max_age: Duration::from_secs(600),
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `3000`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `CORS_MAX_AGE_SECS`     | `600`                   |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                    |
    pub fn from_env() -> Result<Self, CoreError> {
        let defaults = Self::default();
        let cors_origins = match std::env::var("CORS_ORIGINS") {
            Ok(raw) => CorsOrigins::parse(&raw)?,
            Err(_) => defaults.cors_origins,
        };

        let config = Self {
            host: env_or("HOST", defaults.host)?,
            port: env_or("PORT", defaults.port)?,
            cors_origins,
            cors_max_age: Duration::from_secs(env_or(
                "CORS_MAX_AGE_SECS",
                defaults.cors_max_age.as_secs(),
            )?),
            request_timeout: Duration::from_secs(env_or(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            shutdown_timeout: Duration::from_secs(env_or(
                "SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout.as_secs(),
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.request_timeout.is_zero() {
            return Err(CoreError::Validation(
                "REQUEST_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }
        if self.cors_origins == CorsOrigins::List(Vec::new()) {
            return Err(CoreError::Validation(
                "CORS_ORIGINS must name at least one origin, or '*'".to_string(),
            ));
        }
        Ok(())
    }
}
