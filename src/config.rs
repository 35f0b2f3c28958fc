use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default account API URL
pub const DEFAULT_API_BASE_URL: &str = "https://api.adhan.app";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub storage_dir: PathBuf,
    pub platform: String,
    pub app_version: String,
    pub timings: Timings,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let api_base_url = env::var("ADHAN_API_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Self {
            api_base_url,
            storage_dir: env::var("ADHAN_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            platform: env::var("ADHAN_PLATFORM")
                .unwrap_or_else(|_| std::env::consts::OS.to_string()),
            app_version: env::var("ADHAN_APP_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            timings: Timings::default(),
        }
    }
}

/// Every delay and period used by the background checks and the
/// post-payment flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// First local expiry check after start
    pub expiry_check_delay: Duration,
    pub expiry_check_period: Duration,
    /// First server token re-verification after start
    pub reverify_delay: Duration,
    pub reverify_period: Duration,
    /// First explicit-connection audit after start
    pub connection_audit_delay: Duration,
    pub connection_audit_period: Duration,
    /// Wait before logging in after payment so the provider webhook can land
    pub payment_webhook_grace: Duration,
    /// Retry `n` waits `n * retry_backoff_step`
    pub retry_backoff_step: Duration,
    pub auto_backup_period: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            expiry_check_delay: Duration::from_secs(10),
            expiry_check_period: Duration::from_secs(60 * 60),
            reverify_delay: Duration::from_secs(5),
            reverify_period: Duration::from_secs(6 * 60 * 60),
            connection_audit_delay: Duration::from_secs(1),
            connection_audit_period: Duration::from_secs(5 * 60),
            payment_webhook_grace: Duration::from_secs(3),
            retry_backoff_step: Duration::from_secs(2),
            auto_backup_period: Duration::from_secs(5 * 60),
        }
    }
}

impl Timings {
    /// No waiting anywhere. Periods stay at their defaults so periodic tasks
    /// still only fire once per period.
    pub fn immediate() -> Self {
        Self {
            expiry_check_delay: Duration::ZERO,
            reverify_delay: Duration::ZERO,
            connection_audit_delay: Duration::ZERO,
            payment_webhook_grace: Duration::ZERO,
            retry_backoff_step: Duration::ZERO,
            ..Self::default()
        }
    }
}
