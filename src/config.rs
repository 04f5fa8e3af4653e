use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Operating mode for the mobile-money gateway.
///
/// Sandbox is an explicit opt-in that short-circuits gateway calls for
/// local development. A live deployment with missing credentials fails
/// closed; it never silently falls back to sandbox behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    Live,
    Sandbox,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub mode: GatewayMode,
    pub base_url: String,
    pub api_key: Option<String>,
    /// Public base URL webhooks are delivered to, e.g. https://api.example.org
    pub callback_base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// How often the submission worker scans for `created` payments (seconds)
    pub submission_interval_secs: u64,
    /// How often the status poller sweeps `pending` payments (seconds)
    pub poll_interval_secs: u64,
    /// Wall-clock window after which a pending payment is timed out (minutes)
    pub poll_timeout_mins: i64,
    /// Hard ceiling on poll attempts per payment
    pub max_poll_retries: i32,
    /// Bounded per-sweep concurrency for gateway status queries
    pub poll_concurrency: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let server = ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").context("DATABASE_URL not set")?,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
        };

        let mode = match env::var("MOMO_MODE")
            .unwrap_or_else(|_| "live".to_string())
            .to_lowercase()
            .as_str()
        {
            "live" => GatewayMode::Live,
            "sandbox" => GatewayMode::Sandbox,
            other => return Err(anyhow!("MOMO_MODE must be 'live' or 'sandbox', got {}", other)),
        };

        let gateway = GatewayConfig {
            mode,
            base_url: env::var("MOMO_BASE_URL").context("MOMO_BASE_URL not set")?,
            api_key: env::var("MOMO_API_KEY").ok(),
            callback_base_url: env::var("MOMO_CALLBACK_BASE_URL")
                .context("MOMO_CALLBACK_BASE_URL not set")?,
            timeout_secs: env::var("MOMO_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("MOMO_TIMEOUT_SECS must be a valid number")?,
            max_retries: env::var("MOMO_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("MOMO_MAX_RETRIES must be a valid number")?,
        };

        let worker = WorkerConfig {
            submission_interval_secs: env::var("SUBMISSION_INTERVAL_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("SUBMISSION_INTERVAL_SECS must be a valid number")?,
            poll_interval_secs: env::var("POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("POLL_INTERVAL_SECS must be a valid number")?,
            poll_timeout_mins: env::var("POLL_TIMEOUT_MINS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("POLL_TIMEOUT_MINS must be a valid number")?,
            max_poll_retries: env::var("MAX_POLL_RETRIES")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("MAX_POLL_RETRIES must be a valid number")?,
            poll_concurrency: env::var("POLL_CONCURRENCY")
                .unwrap_or_else(|_| "8".to_string())
                .parse()
                .context("POLL_CONCURRENCY must be a valid number")?,
        };

        let config = Config { server, database, gateway, worker };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port < 1024 {
            return Err(anyhow!("Port must be at least 1024, got {}", self.server.port));
        }

        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        if self.database.url.trim().is_empty() {
            return Err(anyhow!("DATABASE_URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        if self.gateway.base_url.trim().is_empty() {
            return Err(anyhow!("MOMO_BASE_URL cannot be empty"));
        }

        if self.gateway.callback_base_url.trim().is_empty() {
            return Err(anyhow!("MOMO_CALLBACK_BASE_URL cannot be empty"));
        }

        // Production must never run in sandbox mode.
        if self.server.environment == "production" && self.gateway.mode == GatewayMode::Sandbox {
            return Err(anyhow!("MOMO_MODE=sandbox is not allowed in production"));
        }

        if self.worker.poll_timeout_mins <= 0 {
            return Err(anyhow!("POLL_TIMEOUT_MINS must be greater than 0"));
        }

        if self.worker.max_poll_retries <= 0 {
            return Err(anyhow!("MAX_POLL_RETRIES must be greater than 0"));
        }

        if self.worker.poll_concurrency == 0 {
            return Err(anyhow!("POLL_CONCURRENCY must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                environment: "development".to_string(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/schoolpay".to_string(),
                max_connections: 20,
            },
            gateway: GatewayConfig {
                mode: GatewayMode::Live,
                base_url: "https://gateway.example.org".to_string(),
                api_key: Some("sk_test".to_string()),
                callback_base_url: "https://api.example.org".to_string(),
                timeout_secs: 30,
                max_retries: 3,
            },
            worker: WorkerConfig {
                submission_interval_secs: 10,
                poll_interval_secs: 30,
                poll_timeout_mins: 10,
                max_poll_retries: 20,
                poll_concurrency: 8,
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn sandbox_rejected_in_production() {
        let mut config = base_config();
        config.server.environment = "production".to_string();
        config.gateway.mode = GatewayMode::Sandbox;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_retry_ceiling_rejected() {
        let mut config = base_config();
        config.worker.max_poll_retries = 0;
        assert!(config.validate().is_err());
    }
}
