use confirm_core::BusyPolicy;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which confirmation classifier backs the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassifierKind {
    /// Deterministic phrase matching, no external service.
    Keyword,
    OpenAI,
    Gemini,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub classifier: ClassifierKind,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub chat_model: String,
    pub log_level: Level,
    pub prompts_path: PathBuf,
    /// Base URL the tool uses to reach the value resource.
    pub resource_base_url: String,
    /// Value served by `GET /resource/value`.
    pub resource_value: i64,
    pub tool_timeout: Duration,
    pub session_idle: Duration,
    pub sweep_interval: Duration,
    pub busy_policy: BusyPolicy,
    /// Role a caller needs before messages reach the agent.
    pub required_role: String,
    pub evict_on_close: bool,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    var_or(name, default)
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

fn parse_secs(name: &str, default: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_var(name, default)?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address: SocketAddr = parse_var("BIND_ADDRESS", "0.0.0.0:3000")?;

        let classifier = match var_or("CLASSIFIER", "keyword").to_lowercase().as_str() {
            "keyword" => ClassifierKind::Keyword,
            "openai" => ClassifierKind::OpenAI,
            "gemini" => ClassifierKind::Gemini,
            other => {
                return Err(ConfigError::InvalidValue(
                    "CLASSIFIER".to_string(),
                    format!("'{}' is not one of keyword, openai, gemini", other),
                ));
            }
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();

        let chat_model = var_or("CHAT_MODEL", "gpt-4o");

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = PathBuf::from(var_or("PROMPTS_PATH", "./prompts"));

        let resource_base_url = var_or("RESOURCE_BASE_URL", "http://127.0.0.1:3000");
        let resource_value: i64 = parse_var("RESOURCE_VALUE", "5")?;

        let tool_timeout = parse_secs("TOOL_TIMEOUT_SECS", "10")?;
        let session_idle = parse_secs("SESSION_IDLE_SECS", "1800")?;
        let sweep_interval = parse_secs("SWEEP_INTERVAL_SECS", "60")?;

        let busy_policy = match var_or("BUSY_POLICY", "queue").to_lowercase().as_str() {
            "queue" => BusyPolicy::Queue,
            "reject" => BusyPolicy::Reject,
            other => {
                return Err(ConfigError::InvalidValue(
                    "BUSY_POLICY".to_string(),
                    format!("'{}' is not one of queue, reject", other),
                ));
            }
        };

        let required_role = var_or("REQUIRED_ROLE", "admin");
        let evict_on_close: bool = parse_var("EVICT_ON_CLOSE", "true")?;

        match classifier {
            ClassifierKind::Keyword => {}
            ClassifierKind::OpenAI => {
                if openai_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "OPENAI_API_KEY must be set for 'openai' classifier".to_string(),
                    ));
                }
            }
            ClassifierKind::Gemini => {
                if gemini_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "GEMINI_API_KEY must be set for 'gemini' classifier".to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            bind_address,
            classifier,
            openai_api_key,
            gemini_api_key,
            chat_model,
            log_level,
            prompts_path,
            resource_base_url,
            resource_value,
            tool_timeout,
            session_idle,
            sweep_interval,
            busy_policy,
            required_role,
            evict_on_close,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tracing::Level;

    const VARS: &[&str] = &[
        "BIND_ADDRESS",
        "CLASSIFIER",
        "OPENAI_API_KEY",
        "GEMINI_API_KEY",
        "CHAT_MODEL",
        "RUST_LOG",
        "PROMPTS_PATH",
        "RESOURCE_BASE_URL",
        "RESOURCE_VALUE",
        "TOOL_TIMEOUT_SECS",
        "SESSION_IDLE_SECS",
        "SWEEP_INTERVAL_SECS",
        "BUSY_POLICY",
        "REQUIRED_ROLE",
        "EVICT_ON_CLOSE",
    ];

    fn clear_env_vars() {
        unsafe {
            for var in VARS {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_env_vars();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.classifier, ClassifierKind::Keyword);
        assert_eq!(config.openai_api_key, None);
        assert_eq!(config.chat_model, "gpt-4o");
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.prompts_path, PathBuf::from("./prompts"));
        assert_eq!(config.resource_base_url, "http://127.0.0.1:3000");
        assert_eq!(config.resource_value, 5);
        assert_eq!(config.tool_timeout, Duration::from_secs(10));
        assert_eq!(config.session_idle, Duration::from_secs(1800));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.busy_policy, BusyPolicy::Queue);
        assert_eq!(config.required_role, "admin");
        assert!(config.evict_on_close);
    }

    #[test]
    #[serial]
    fn test_config_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
            env::set_var("CLASSIFIER", "OpenAI");
            env::set_var("OPENAI_API_KEY", "custom-openai-key");
            env::set_var("CHAT_MODEL", "gpt-4o-mini");
            env::set_var("RUST_LOG", "debug");
            env::set_var("PROMPTS_PATH", "/custom/prompts");
            env::set_var("RESOURCE_BASE_URL", "http://resource:8081");
            env::set_var("RESOURCE_VALUE", "42");
            env::set_var("TOOL_TIMEOUT_SECS", "3");
            env::set_var("BUSY_POLICY", "reject");
            env::set_var("REQUIRED_ROLE", "user");
            env::set_var("EVICT_ON_CLOSE", "false");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(config.classifier, ClassifierKind::OpenAI);
        assert_eq!(config.openai_api_key, Some("custom-openai-key".to_string()));
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.prompts_path, PathBuf::from("/custom/prompts"));
        assert_eq!(config.resource_base_url, "http://resource:8081");
        assert_eq!(config.resource_value, 42);
        assert_eq!(config.tool_timeout, Duration::from_secs(3));
        assert_eq!(config.busy_policy, BusyPolicy::Reject);
        assert_eq!(config.required_role, "user");
        assert!(!config.evict_on_close);
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "not-a-valid-address");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BIND_ADDRESS"),
            _ => panic!("Expected InvalidValue for BIND_ADDRESS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    #[serial]
    fn test_config_rejects_zero_timeout_and_unknown_policy() {
        clear_env_vars();
        unsafe {
            env::set_var("TOOL_TIMEOUT_SECS", "0");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "TOOL_TIMEOUT_SECS"),
            _ => panic!("Expected InvalidValue for TOOL_TIMEOUT_SECS"),
        }

        clear_env_vars();
        unsafe {
            env::set_var("BUSY_POLICY", "drop");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BUSY_POLICY"),
            _ => panic!("Expected InvalidValue for BUSY_POLICY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_missing_llm_keys() {
        clear_env_vars();
        unsafe {
            env::set_var("CLASSIFIER", "openai");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::MissingVar(msg) => assert!(msg.contains("OPENAI_API_KEY")),
            _ => panic!("Expected MissingVar for OPENAI_API_KEY"),
        }

        clear_env_vars();
        unsafe {
            env::set_var("CLASSIFIER", "gemini");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::MissingVar(msg) => assert!(msg.contains("GEMINI_API_KEY")),
            _ => panic!("Expected MissingVar for GEMINI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_unknown_classifier() {
        clear_env_vars();
        unsafe {
            env::set_var("CLASSIFIER", "oracle");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "CLASSIFIER"),
            _ => panic!("Expected InvalidValue for CLASSIFIER"),
        }
    }
}
