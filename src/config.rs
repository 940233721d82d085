//! Configuration management for the swapmatch service
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub service: ServiceConfig,
    pub retry: RetryConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub instance_id: String,
    /// How often the sweeper looks for due auctions
    pub sweep_interval_secs: u64,
    /// Page size for targeting-history listings
    pub history_page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("SWAPMATCH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.service.sweep_interval_secs == 0 {
            anyhow::bail!("sweep_interval_secs must be positive");
        }
        if self.service.history_page_size == 0 {
            anyhow::bail!("history_page_size must be positive");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            anyhow::bail!("retry.max_delay_ms must not be below retry.base_delay_ms");
        }
        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref VAR_RE: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
    }

    let mut result = input.to_string();
    for cap in VAR_RE.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("SWAPMATCH_TEST_VAR", "sweeper-1");
        let input = "instance_id = \"${SWAPMATCH_TEST_VAR}\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "instance_id = \"sweeper-1\"");
    }

    #[test]
    fn load_from_file_and_validate() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[service]
instance_id = "test"
sweep_interval_secs = 5
history_page_size = 25

[retry]
max_attempts = 4
base_delay_ms = 10
max_delay_ms = 200

[api]
host = "127.0.0.1"
port = 8080

[metrics]
enabled = false
port = 9100
"#
        )
        .unwrap();
        env::set_var("SWAPMATCH_CONFIG", file.path());
        let settings = Settings::load().unwrap();
        assert_eq!(settings.service.history_page_size, 25);
        assert_eq!(settings.retry.max_attempts, 4);
        env::remove_var("SWAPMATCH_CONFIG");
    }

    #[test]
    fn zero_sweep_interval_is_rejected() {
        let settings = Settings {
            service: ServiceConfig {
                instance_id: "test".into(),
                sweep_interval_secs: 0,
                history_page_size: 25,
            },
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 10,
                max_delay_ms: 100,
            },
            api: ApiConfig {
                host: "127.0.0.1".into(),
                port: 8080,
            },
            metrics: MetricsConfig {
                enabled: false,
                port: 9100,
            },
        };
        assert!(settings.validate().is_err());
    }
}
