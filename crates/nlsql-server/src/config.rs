//! Configuration system for the nlsql server
//!
//! Loads configuration from:
//! 1. config.yaml - operational settings (port, transport, repair budget, logging)
//! 2. .env file - secrets (API keys, Azure endpoint)
//!
//! Environment variables always override config.yaml values.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Which entry point the binary serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Http,
    Mcp,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Transport::Http),
            "mcp" => Ok(Transport::Mcp),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    Azure,
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "azure" => Ok(LlmProvider::Azure),
            other => Err(other.to_string()),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub transport: Transport,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            transport: Transport::Http,
        }
    }
}

/// Repair loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Regenerations allowed after the first attempt
    pub max_regenerations: u32,

    /// YAML rule file loaded at startup
    pub rules_path: String,

    /// Deadline for one whole request, after which the run is cancelled
    pub request_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_regenerations: 2,
            rules_path: "rules.yaml".to_string(),
            request_timeout_ms: 120_000,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// DuckDB file; in-memory when absent
    pub path: Option<String>,
    pub read_only: bool,
    pub timeout_ms: u64,
    pub max_rows: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: Some("data/demo.duckdb".to_string()),
            read_only: true,
            timeout_ms: 30_000,
            max_rows: 10_000,
        }
    }
}

/// Language model configuration (secrets come from the environment)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub temperature: f32,
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAi,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            timeout_ms: 30_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: stdout, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub orchestrator: OrchestratorConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
}

/// Azure OpenAI deployment settings, read from the environment
#[derive(Debug, Clone)]
pub struct AzureSettings {
    pub api_key: String,
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
}

fn required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_env<T: FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        })
}

impl Config {
    /// Load configuration from YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&contents)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file means defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut config = Config::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = std::env::var("NLSQL_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("NLSQL_SERVER_PORT") {
            self.server.port = parse_env("NLSQL_SERVER_PORT", port)?;
        }
        if let Ok(transport) = std::env::var("NLSQL_TRANSPORT") {
            self.server.transport = parse_env("NLSQL_TRANSPORT", transport)?;
        }

        if let Ok(max) = std::env::var("NLSQL_MAX_REGENERATIONS") {
            self.orchestrator.max_regenerations = parse_env("NLSQL_MAX_REGENERATIONS", max)?;
        }
        if let Ok(path) = std::env::var("NLSQL_RULES_PATH") {
            self.orchestrator.rules_path = path;
        }

        if let Ok(path) = std::env::var("NLSQL_DATABASE_PATH") {
            self.database.path = if path.is_empty() { None } else { Some(path) };
        }

        if let Ok(provider) = std::env::var("NLSQL_LLM_PROVIDER") {
            self.llm.provider = parse_env("NLSQL_LLM_PROVIDER", provider)?;
        }
        if let Ok(model) = std::env::var("NLSQL_LLM_MODEL") {
            self.llm.model = model;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            self.logging.directory = dir;
        }

        Ok(())
    }

    /// Get OpenAI API key from environment (must be in .env)
    pub fn get_openai_api_key() -> Result<String, ConfigError> {
        required_env("OPENAI_API_KEY")
    }

    /// Get Azure OpenAI settings from environment
    pub fn get_azure_settings() -> Result<AzureSettings, ConfigError> {
        Ok(AzureSettings {
            api_key: required_env("AZURE_OPENAI_API_KEY")?,
            endpoint: required_env("AZURE_OPENAI_ENDPOINT")?,
            deployment: required_env("AZURE_OPENAI_DEPLOYMENT")?,
            api_version: std::env::var("AZURE_OPENAI_API_VERSION").unwrap_or_else(|_| "2024-06-01".to_string()),
        })
    }

    /// Set logging environment variables for the logging module
    pub fn apply_logging_env(&self) {
        std::env::set_var("RUST_LOG", &self.logging.level);
        std::env::set_var("LOG_FORMAT", &self.logging.format);
        std::env::set_var("LOG_OUTPUT", &self.logging.output);
        std::env::set_var("LOG_DIR", &self.logging.directory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.transport, Transport::Http);
        assert_eq!(config.orchestrator.max_regenerations, 2);
        assert!(config.database.read_only);
        assert_eq!(config.llm.provider, LlmProvider::OpenAi);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.logging.output, "stdout");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml_str(
            r#"
server:
  transport: mcp
orchestrator:
  max_regenerations: 5
llm:
  provider: azure
"#,
        )
        .unwrap();

        assert_eq!(config.server.transport, Transport::Mcp);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.orchestrator.max_regenerations, 5);
        assert_eq!(config.orchestrator.rules_path, "rules.yaml");
        assert_eq!(config.llm.provider, LlmProvider::Azure);
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn test_unknown_transport_is_rejected() {
        assert!(Config::from_yaml_str("server:\n  transport: grpc\n").is_err());
        assert_eq!("MCP".parse::<Transport>(), Ok(Transport::Mcp));
    }

    #[test]
    fn test_env_var_override() {
        std::env::set_var("NLSQL_SERVER_PORT", "9090");
        std::env::set_var("NLSQL_MAX_REGENERATIONS", "4");

        // Create a temp config file
        let config_yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080
orchestrator:
  max_regenerations: 1
logging:
  level: "info"
  format: "pretty"
  output: "stdout"
  directory: "./logs"
"#;
        let temp_file = std::env::temp_dir().join("nlsql_test_config.yaml");
        std::fs::write(&temp_file, config_yaml).unwrap();

        let config = Config::load(&temp_file).unwrap();
        assert_eq!(config.server.port, 9090); // Overridden
        assert_eq!(config.orchestrator.max_regenerations, 4); // Overridden

        std::env::remove_var("NLSQL_SERVER_PORT");
        std::env::remove_var("NLSQL_MAX_REGENERATIONS");
        std::fs::remove_file(temp_file).ok();
    }
}
