use std::env;

use balance_common::{
    helpers::{env_minutes, parse_boolean_flag, parse_number},
    Secret,
};
use balance_engine::{
    workers::{adjustment::PolicyKind, WorkerSettings},
    EngineConfig,
};
use log::*;
use shopee_tools::ShopeeConfig;

const DEFAULT_BAL_HOST: &str = "127.0.0.1";
const DEFAULT_BAL_PORT: u16 = 8380;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/balance.db";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 25;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    /// When `None`, leases, queues and caches live in process memory. Only suitable for a single node.
    pub redis_url: Option<String>,
    pub shopee: ShopeeConfig,
    pub webhook: WebhookConfig,
    /// Bearer token for the `/admin` routes. The routes are not mounted when this is empty.
    pub admin_token: Secret<String>,
    pub workers: WorkerSettings,
    pub adjustment_policy: PolicyKind,
    /// Run the HTTP intake only. Another node is expected to run the background workers.
    pub disable_workers: bool,
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    /// If false, push notifications are accepted without checking their signature. **DANGER**
    pub hmac_checks: bool,
    /// The callback URL registered with the marketplace. Pushes are signed over this URL, so it must match exactly
    /// when the server sits behind a proxy. When unset, the URL is rebuilt from the incoming request.
    pub callback_url: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self { hmac_checks: true, callback_url: None }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BAL_HOST.to_string(),
            port: DEFAULT_BAL_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            redis_url: None,
            shopee: ShopeeConfig::default(),
            webhook: WebhookConfig::default(),
            admin_token: Secret::default(),
            workers: WorkerSettings::default(),
            adjustment_policy: PolicyKind::default(),
            disable_workers: false,
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("BAL_HOST").ok().unwrap_or_else(|| {
            info!("🪛️ BAL_HOST is not set. Using the default, {DEFAULT_BAL_HOST}.");
            DEFAULT_BAL_HOST.into()
        });
        let port = env::var("BAL_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for BAL_PORT. {e} Using the default, {DEFAULT_BAL_PORT}, instead."
                    );
                    DEFAULT_BAL_PORT
                })
            })
            .unwrap_or(DEFAULT_BAL_PORT);
        let database_url = env::var("BAL_DATABASE_URL").ok().unwrap_or_else(|| {
            info!("🪛️ BAL_DATABASE_URL is not set. Using the default, {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.into()
        });
        let db_max_connections =
            parse_number(env::var("BAL_DB_MAX_CONNECTIONS").ok(), DEFAULT_DB_MAX_CONNECTIONS).max(1);
        let redis_url = env::var("BAL_REDIS_URL").ok().filter(|s| !s.trim().is_empty());
        if redis_url.is_none() {
            warn!(
                "🪛️ BAL_REDIS_URL is not set. Using the in-memory store. Do not run more than one node with this \
                 configuration."
            );
        }
        let shopee = ShopeeConfig::new_from_env_or_default();
        let webhook = WebhookConfig::from_env_or_default();
        let admin_token = Secret::new(env::var("BAL_ADMIN_TOKEN").unwrap_or_default());
        if admin_token.is_empty() {
            info!("🪛️ BAL_ADMIN_TOKEN is not set. The admin routes are disabled.");
        }
        let workers = worker_settings_from_env();
        let adjustment_policy = env::var("BAL_ADJUSTMENT_POLICY")
            .ok()
            .map(|s| {
                s.parse::<PolicyKind>().unwrap_or_else(|e| {
                    error!("🪛️ {e}. Using the manual review policy instead.");
                    PolicyKind::Manual
                })
            })
            .unwrap_or_else(|| {
                info!("🪛️ BAL_ADJUSTMENT_POLICY is not set. Using the default, manual review.");
                PolicyKind::Manual
            });
        let disable_workers = parse_boolean_flag(env::var("BAL_DISABLE_WORKERS").ok(), false);
        Self {
            host,
            port,
            database_url,
            db_max_connections,
            redis_url,
            shopee,
            webhook,
            admin_token,
            workers,
            adjustment_policy,
            disable_workers,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig { workers: self.workers.clone(), adjustment_policy: self.adjustment_policy }
    }
}

impl WebhookConfig {
    pub fn from_env_or_default() -> Self {
        let hmac_checks = parse_boolean_flag(env::var("BAL_WEBHOOK_HMAC_CHECKS").ok(), true);
        if !hmac_checks {
            warn!("🪛️ Webhook HMAC checks are DISABLED. Anyone can push events to this server.");
        }
        let callback_url = env::var("BAL_WEBHOOK_URL").ok().filter(|s| !s.trim().is_empty());
        Self { hmac_checks, callback_url }
    }
}

fn worker_settings_from_env() -> WorkerSettings {
    let defaults = WorkerSettings::default();
    let sync_workers = parse_number(env::var("BAL_SYNC_WORKERS").ok(), defaults.sync_workers).max(1);
    let finance_workers = parse_number(env::var("BAL_FINANCE_WORKERS").ok(), defaults.finance_workers).max(1);
    let sync_interval = env_minutes("BAL_SYNC_INTERVAL_MIN", 30);
    let finance_interval = env_minutes("BAL_FINANCE_INTERVAL_MIN", 60);
    debug!(
        "🪛️ Workers: {sync_workers} sync every {}m, {finance_workers} finance every {}m",
        sync_interval.as_secs() / 60,
        finance_interval.as_secs() / 60
    );
    WorkerSettings { sync_workers, finance_workers, sync_interval, finance_interval, ..defaults }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8380);
        assert_eq!(config.database_url, "sqlite://data/balance.db");
        assert_eq!(config.db_max_connections, 25);
        assert!(config.redis_url.is_none());
        assert!(config.webhook.hmac_checks);
        assert!(config.admin_token.is_empty());
        assert_eq!(config.adjustment_policy, PolicyKind::Manual);
        assert_eq!(config.workers.sync_workers, 16);
        assert_eq!(config.workers.finance_interval, Duration::from_secs(3600));
        assert!(!config.disable_workers);
    }

    #[test]
    fn secrets_stay_hidden() {
        let config = ServerConfig { admin_token: Secret::new("hunter2".to_string()), ..Default::default() };
        let printed = format!("{config:?}");
        assert!(!printed.contains("hunter2"));
    }
}
