use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub paymob: PaymobConfig,
    pub scheduler: SchedulerConfig,
    pub notifier: NotifierConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    /// Postgres connection string. When unset the service falls back to the
    /// in-memory store (non-durable, intended for local runs and tests).
    pub url: Option<Secret<String>>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Deserialize, Clone, Debug)]
pub struct PaymobConfig {
    pub api_base_url: String,
    pub secret_key: Secret<String>,
    pub public_key: String,
    /// Hex-encoded HMAC secret for webhook verification.
    pub hmac_secret: Secret<String>,
    /// Integration used for interactive (payer-present) charges.
    pub integration_id: u64,
    /// Integration used for unattended token charges (card-not-present).
    pub moto_integration_id: u64,
    pub currency: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// How long a scheduler-fired charge may stay unresolved before the plan
    /// becomes due again.
    pub charge_ttl_secs: i64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct NotifierConfig {
    /// Endpoint for fire-and-forget payment notifications; logs only when unset.
    pub url: Option<String>,
}

impl PaymobConfig {
    pub fn is_configured(&self) -> bool {
        use secrecy::ExposeSecret;
        !self.secret_key.expose_secret().is_empty()
            && !self.hmac_secret.expose_secret().is_empty()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("PAYFLOW_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PAYFLOW_SERVICE_PORT")
            .unwrap_or_else(|_| "3007".to_string())
            .parse()?;

        let db_url = env::var("PAYFLOW_DATABASE_URL").ok().map(Secret::new);
        let max_connections = env::var("PAYFLOW_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("PAYFLOW_DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let paymob_base = env::var("PAYMOB_API_BASE_URL")
            .unwrap_or_else(|_| "https://accept.paymob.com".to_string());
        let secret_key = env::var("PAYMOB_SECRET_KEY").unwrap_or_default();
        let public_key = env::var("PAYMOB_PUBLIC_KEY").unwrap_or_default();
        let hmac_secret = env::var("PAYMOB_HMAC_SECRET").unwrap_or_default();
        let integration_id = env::var("PAYMOB_INTEGRATION_ID")
            .unwrap_or_else(|_| "0".to_string())
            .parse()?;
        let moto_integration_id = env::var("PAYMOB_MOTO_INTEGRATION_ID")
            .unwrap_or_else(|_| "0".to_string())
            .parse()?;
        let currency = env::var("PAYMOB_CURRENCY").unwrap_or_else(|_| "EGP".to_string());

        let scheduler_enabled = env::var("PAYFLOW_SCHEDULER_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);
        let interval_secs = env::var("PAYFLOW_SCHEDULER_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()?;
        let charge_ttl_secs = env::var("PAYFLOW_SCHEDULER_CHARGE_TTL_SECS")
            .unwrap_or_else(|_| "900".to_string())
            .parse()?;

        let notifier_url = env::var("PAYFLOW_NOTIFY_URL").ok();

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: db_url,
                max_connections,
                min_connections,
            },
            paymob: PaymobConfig {
                api_base_url: paymob_base,
                secret_key: Secret::new(secret_key),
                public_key,
                hmac_secret: Secret::new(hmac_secret),
                integration_id,
                moto_integration_id,
                currency,
            },
            scheduler: SchedulerConfig {
                enabled: scheduler_enabled,
                interval_secs,
                charge_ttl_secs,
            },
            notifier: NotifierConfig { url: notifier_url },
            service_name: "payflow-service".to_string(),
        })
    }
}
