use std::env;
use std::time::Duration;

use layerscope_services::RegistryConfig;
use layerscope_services::hub_service::DEFAULT_HUB_URL;
use layerscope_services::notification_service::DEFAULT_NOTIFICATION_RETRIES;
use layerscope_services::registry::client::{DEFAULT_AUTH_URL, DEFAULT_REGISTRY_URL, DEFAULT_SERVICE};

pub const DEFAULT_SITE_URL: &str = "https://microbadger.com";

#[derive(Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub database_url: String,

    // Queues
    pub redis_url: Option<String>,
    pub queue_prefix: String,
    pub queue_visibility_timeout: Duration,
    pub poll_interval: Duration,

    // Upstream services
    pub registry_url: String,
    pub registry_auth_url: String,
    pub registry_service: String,
    pub hub_url: String,
    pub http_timeout: Duration,
    pub rate_limit_delay: Duration,

    pub notification_retries: i32,
    pub site_url: String,
    pub secrets_master_key: Option<String>,

    // Which loops this process runs
    pub enable_inspect: bool,
    pub enable_size: bool,
    pub enable_notify: bool,
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no" | "off"))
        .unwrap_or(true)
}

impl Config {
    pub fn from_env() -> Self {
        let database_url = env::var("DATABASE_URL")
            .expect("DATABASE_URL environment variable must be set");

        Self {
            server_host: env_or("WORKER_HOST", "127.0.0.1"),
            server_port: env_parse("WORKER_PORT", 8081),
            database_url,
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
            queue_prefix: env_or("QUEUE_PREFIX", "layerscope"),
            queue_visibility_timeout: Duration::from_secs(env_parse("QUEUE_VISIBILITY_TIMEOUT", 300)),
            poll_interval: Duration::from_millis(env_parse("POLL_INTERVAL_MS", 250)),
            registry_url: env_or("REGISTRY_URL", DEFAULT_REGISTRY_URL),
            registry_auth_url: env_or("REGISTRY_AUTH_URL", DEFAULT_AUTH_URL),
            registry_service: env_or("REGISTRY_SERVICE", DEFAULT_SERVICE),
            hub_url: env_or("HUB_URL", DEFAULT_HUB_URL),
            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT", 10)),
            rate_limit_delay: Duration::from_secs(env_parse("RATE_LIMIT_DELAY", 10)),
            notification_retries: env_parse("NOTIFICATION_RETRIES", DEFAULT_NOTIFICATION_RETRIES),
            site_url: env_or("SITE_URL", DEFAULT_SITE_URL),
            secrets_master_key: env::var("SECRETS_MASTER_KEY").ok().filter(|v| !v.is_empty()),
            enable_inspect: env_flag("ENABLE_INSPECT"),
            enable_size: env_flag("ENABLE_SIZE"),
            enable_notify: env_flag("ENABLE_NOTIFY"),
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            registry_url: self.registry_url.clone(),
            auth_url: self.registry_auth_url.clone(),
            service: self.registry_service.clone(),
            timeout: self.http_timeout,
            rate_limit_delay: self.rate_limit_delay,
        }
    }
}
