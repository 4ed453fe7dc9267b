use std::env;
use std::net::{IpAddr, SocketAddr};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub assignment: AssignmentSettings,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = match env::var("APP_PORT") {
            Ok(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort { value: raw })?,
            Err(_) => 3000,
        };

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            assignment: AssignmentSettings::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// How the service drives an assignment task once it has been started or resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Hand the batch loop to a blocking tokio worker and return immediately.
    Background,
    /// Run the batch loop to completion (or pause) before returning.
    Inline,
}

impl ExecutionMode {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "background" | "async" => Ok(Self::Background),
            "inline" | "sync" => Ok(Self::Inline),
            _ => Err(ConfigError::InvalidExecutionMode {
                value: value.to_string(),
            }),
        }
    }
}

/// Defaults and limits applied by the assignment service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentSettings {
    pub default_batch_size: u32,
    pub default_max_cases_per_mediator: u32,
    pub execution: ExecutionMode,
    pub max_page_size: u32,
}

impl Default for AssignmentSettings {
    fn default() -> Self {
        Self {
            default_batch_size: 100,
            default_max_cases_per_mediator: 50,
            execution: ExecutionMode::Background,
            max_page_size: 100,
        }
    }
}

impl AssignmentSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let default_batch_size = positive_var("ASSIGNMENT_BATCH_SIZE", defaults.default_batch_size)?;
        let default_max_cases_per_mediator = positive_var(
            "ASSIGNMENT_MAX_CASES_PER_MEDIATOR",
            defaults.default_max_cases_per_mediator,
        )?;
        let max_page_size = positive_var("ASSIGNMENT_MAX_PAGE_SIZE", defaults.max_page_size)?;
        let execution = match env::var("ASSIGNMENT_EXECUTION") {
            Ok(value) => ExecutionMode::parse(&value)?,
            Err(_) => defaults.execution,
        };

        Ok(Self {
            default_batch_size,
            default_max_cases_per_mediator,
            execution,
            max_page_size,
        })
    }
}

fn positive_var(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<u32>() {
            Ok(value) if value > 0 => Ok(value),
            _ => Err(ConfigError::InvalidLimit { name, value: raw }),
        },
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("APP_PORT must be a valid u16 (got '{value}')")]
    InvalidPort { value: String },
    #[error("APP_HOST must parse to an IPv4 or IPv6 address")]
    InvalidHost {
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("{name} must be a positive integer (got '{value}')")]
    InvalidLimit { name: &'static str, value: String },
    #[error("ASSIGNMENT_EXECUTION must be 'background' or 'inline' (got '{value}')")]
    InvalidExecutionMode { value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "ASSIGNMENT_BATCH_SIZE",
            "ASSIGNMENT_MAX_CASES_PER_MEDIATOR",
            "ASSIGNMENT_EXECUTION",
            "ASSIGNMENT_MAX_PAGE_SIZE",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.assignment, AssignmentSettings::default());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn reads_assignment_overrides() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("ASSIGNMENT_BATCH_SIZE", "250");
        env::set_var("ASSIGNMENT_EXECUTION", "inline");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.assignment.default_batch_size, 250);
        assert_eq!(config.assignment.execution, ExecutionMode::Inline);
        reset_env();
    }

    #[test]
    fn rejects_zero_batch_size() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("ASSIGNMENT_BATCH_SIZE", "0");
        let err = AppConfig::load().expect_err("zero batch size rejected");
        assert!(matches!(
            err,
            ConfigError::InvalidLimit {
                name: "ASSIGNMENT_BATCH_SIZE",
                ..
            }
        ));
        reset_env();
    }

    #[test]
    fn rejects_unknown_execution_mode() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("ASSIGNMENT_EXECUTION", "eventually");
        let err = AppConfig::load().expect_err("unknown mode rejected");
        assert!(err.to_string().contains("eventually"));
        reset_env();
    }

    #[test]
    fn reports_the_rejected_port() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_PORT", "70000");
        let err = AppConfig::load().expect_err("port out of range");
        assert!(matches!(err, ConfigError::InvalidPort { ref value } if value == "70000"));
        reset_env();
    }
}
