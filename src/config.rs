use std::env;

/// Default lease timeout for payment-event processing claims (5 minutes).
pub const DEFAULT_EVENT_LEASE_TIMEOUT_SECS: i64 = 300;

/// Default lease timeout for the contract-email send lease (5 minutes).
pub const DEFAULT_EMAIL_LEASE_TIMEOUT_SECS: i64 = 300;

/// Default inactivity window after which an abandoned track lock is swept.
pub const DEFAULT_LOCK_MAX_AGE_SECS: i64 = 1800;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub dev_mode: bool,

    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,

    /// Contract-generation collaborator endpoint (notifier disabled when unset).
    pub contract_service_url: Option<String>,
    /// Bearer token for outbound calls to the contract service.
    pub contract_service_token: Option<String>,
    /// Bearer token the contract service uses to call us back.
    pub contract_callback_token: Option<String>,

    pub resend_api_key: Option<String>,
    pub email_from: String,

    pub event_lease_timeout_secs: i64,
    pub email_lease_timeout_secs: i64,
    pub lock_max_age_secs: i64,
    /// Processed ledger rows older than this are purged on startup (0 = never).
    pub event_retention_days: i64,
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("BEATVAULT_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "beatvault.db".to_string()),
            base_url,
            dev_mode,
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            contract_service_url: env::var("BEATVAULT_CONTRACT_SERVICE_URL").ok(),
            contract_service_token: env::var("BEATVAULT_CONTRACT_SERVICE_TOKEN").ok(),
            contract_callback_token: env::var("BEATVAULT_CONTRACT_CALLBACK_TOKEN").ok(),
            resend_api_key: env::var("RESEND_API_KEY").ok(),
            email_from: env::var("BEATVAULT_EMAIL_FROM")
                .unwrap_or_else(|_| "orders@beatvault.app".to_string()),
            event_lease_timeout_secs: env_i64(
                "BEATVAULT_EVENT_LEASE_TIMEOUT_SECS",
                DEFAULT_EVENT_LEASE_TIMEOUT_SECS,
            ),
            email_lease_timeout_secs: env_i64(
                "BEATVAULT_EMAIL_LEASE_TIMEOUT_SECS",
                DEFAULT_EMAIL_LEASE_TIMEOUT_SECS,
            ),
            lock_max_age_secs: env_i64("BEATVAULT_LOCK_MAX_AGE_SECS", DEFAULT_LOCK_MAX_AGE_SECS),
            event_retention_days: env_i64("BEATVAULT_EVENT_RETENTION_DAYS", 30),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
