//! Application settings.
//!
//! Settings are read once at startup and passed explicitly to whatever needs
//! them (usually through the
//! [`ApplicationContext`](crate::application::ApplicationContext)).
//!
//! # Environment variables
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `APP_NAME` | `app_name` | `fractal` |
//! | `APP_ENV` | `environment` | `development` |
//! | `LOG_LEVEL` | `log_level` | `info` |
//! | `SPECIFICATION_BACKEND` | `specification_backend` | `memory` |
//! | `EVENT_STORE_ENCODING` | `event_encoding` | `object` |
//!
//! # Example
//!
//! ```
//! use fractal_core::settings::{Environment, Settings};
//! use fractal_core::specification::builders::Backend;
//!
//! let settings = Settings::from_lookup(|key| match key {
//!     "APP_ENV" => Some("production".to_string()),
//!     "SPECIFICATION_BACKEND" => Some("mongo".to_string()),
//!     _ => None,
//! })
//! .unwrap();
//!
//! assert_eq!(settings.environment, Environment::Production);
//! assert_eq!(settings.specification_backend, Backend::Mongo);
//! assert_eq!(settings.log_level, "info");
//! ```

use crate::event_store::{EventEncoding, ParseEventEncodingError};
use crate::specification::builders::{Backend, ParseBackendError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid environment value
    #[error("Invalid environment: {0}")]
    InvalidEnvironment(String),

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// A variable could not be parsed
    #[error("Failed to parse {variable}: {reason}")]
    ParseError {
        /// The offending variable
        variable: &'static str,
        /// Parser message
        reason: String,
    },
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Development environment (local)
    #[default]
    Development,
    /// Staging environment (pre-production)
    Staging,
    /// Production environment
    Production,
}

impl Environment {
    /// Check if this is production environment
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    /// Check if this is development environment
    #[must_use]
    pub const fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "prod" | "production" => Ok(Self::Production),
            _ => Err(ConfigError::InvalidEnvironment(s.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Staging => write!(f, "staging"),
            Self::Production => write!(f, "production"),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Application name, used in log output
    pub app_name: String,
    /// Deployment environment
    pub environment: Environment,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Backend that specifications are translated for
    pub specification_backend: Backend,
    /// Payload encoding of the event store
    pub event_encoding: EventEncoding,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "fractal".to_string(),
            environment: Environment::Development,
            log_level: "info".to_string(),
            specification_backend: Backend::Memory,
            event_encoding: EventEncoding::Object,
        }
    }
}

impl Settings {
    /// Load settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is malformed or the result fails
    /// [`Settings::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through `lookup`; unset keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a value is malformed or the result fails
    /// [`Settings::validate`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(name) = lookup("APP_NAME") {
            settings.app_name = name;
        }
        if let Some(env) = lookup("APP_ENV") {
            settings.environment = env.parse()?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            settings.log_level = level.to_lowercase();
        }
        if let Some(backend) = lookup("SPECIFICATION_BACKEND") {
            settings.specification_backend = backend.parse().map_err(|e: ParseBackendError| {
                ConfigError::ParseError {
                    variable: "SPECIFICATION_BACKEND",
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(encoding) = lookup("EVENT_STORE_ENCODING") {
            settings.event_encoding = encoding.parse().map_err(|e: ParseEventEncodingError| {
                ConfigError::ParseError {
                    variable: "EVENT_STORE_ENCODING",
                    reason: e.to_string(),
                }
            })?;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings
    ///
    /// # Errors
    ///
    /// Returns error if the app name is empty or the log level is unknown
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::ValidationError("app_name cannot be empty".to_string()));
        }
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "invalid log_level: {}. Must be one of: {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }
}
