//! Global application configuration manager.
//!
//! `AppConfig` is a lazily initialized, globally accessible singleton containing
//! runtime configuration values loaded from environment variables. It provides
//! thread-safe access and mutation for testing or overrides in runtime environments.

use std::env;
use std::sync::{OnceLock, RwLock};

/// Represents the complete application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub project_name: String,
    pub log_level: String,
    pub log_file: String,
    pub log_to_stdout: bool,
    pub database_path: String,
    pub host: String,
    pub port: u16,
    /// Shared secret used to verify grading webhook signatures.
    pub grading_webhook_secret: String,
    /// Maximum allowed age, in seconds, of the timestamp carried by a webhook
    /// before the delivery is treated as a replay.
    pub webhook_max_skew_seconds: i64,
    /// Whether a PARTIAL grading result with an overall score may be applied
    /// as final instead of downgrading the submission to failed.
    pub accept_partial_results: bool,
    /// How long a submission may sit in `processing` without a callback
    /// before the sweep marks it failed.
    pub grading_timeout_seconds: i64,
    /// How old a ledger row stuck in `received` must be before the recovery
    /// pass re-drives it.
    pub stuck_job_recovery_seconds: i64,
}

/// Lazily-initialized, thread-safe singleton instance of `AppConfig`.
static CONFIG_INSTANCE: OnceLock<RwLock<AppConfig>> = OnceLock::new();

impl AppConfig {
    /// Loads the configuration from `.env` and environment variables.
    ///
    /// This method is used internally to populate the singleton. It panics
    /// if required variables are missing or improperly formatted.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            env: env::var("APP_ENV").unwrap_or_else(|_| "development".into()),
            project_name: env::var("PROJECT_NAME").unwrap_or_else(|_| "course-api".into()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "api=info".into()),
            log_file: env::var("LOG_FILE").unwrap_or_else(|_| "api.log".into()),
            log_to_stdout: env::var("LOG_TO_STDOUT").unwrap_or_else(|_| "false".into()) == "true",
            database_path: env::var("DATABASE_PATH").expect("DATABASE_PATH is required"),
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".into())
                .parse()
                .unwrap(),
            grading_webhook_secret: env::var("GRADING_WEBHOOK_SECRET")
                .expect("GRADING_WEBHOOK_SECRET is required"),
            webhook_max_skew_seconds: env::var("WEBHOOK_MAX_SKEW_SECONDS")
                .unwrap_or_else(|_| "300".into())
                .parse()
                .unwrap(),
            accept_partial_results: env::var("ACCEPT_PARTIAL_RESULTS")
                .unwrap_or_else(|_| "false".into())
                == "true",
            grading_timeout_seconds: env::var("GRADING_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "900".into())
                .parse()
                .unwrap(),
            stuck_job_recovery_seconds: env::var("STUCK_JOB_RECOVERY_SECONDS")
                .unwrap_or_else(|_| "120".into())
                .parse()
                .unwrap(),
        }
    }

    /// Returns a shared reference to the global configuration.
    ///
    /// # Panics
    /// Panics if the lock cannot be acquired.
    pub fn global() -> std::sync::RwLockReadGuard<'static, AppConfig> {
        CONFIG_INSTANCE
            .get_or_init(|| RwLock::new(AppConfig::from_env()))
            .read()
            .expect("Failed to acquire AppConfig read lock")
    }

    /// Resets the configuration by reloading from environment variables.
    ///
    /// Useful in tests to clear overrides.
    pub fn reset() {
        if let Some(lock) = CONFIG_INSTANCE.get() {
            let mut guard = lock.write().unwrap();
            *guard = AppConfig::from_env();
        }
    }

    /// Generic internal setter for any field in the config.
    ///
    /// Used by public per-field setter methods.
    fn set_field<F>(setter: F)
    where
        F: FnOnce(&mut AppConfig),
    {
        let lock = CONFIG_INSTANCE.get_or_init(|| RwLock::new(AppConfig::from_env()));
        let mut guard = lock
            .write()
            .expect("Failed to acquire AppConfig write lock");
        setter(&mut guard);
    }

    // --- Per-field setters below ---

    pub fn set_env(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.env = value.into());
    }

    pub fn set_project_name(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.project_name = value.into());
    }

    pub fn set_log_level(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.log_level = value.into());
    }

    pub fn set_log_file(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.log_file = value.into());
    }

    pub fn set_log_to_stdout(value: bool) {
        AppConfig::set_field(|cfg| cfg.log_to_stdout = value);
    }

    pub fn set_database_path(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.database_path = value.into());
    }

    pub fn set_host(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.host = value.into());
    }

    pub fn set_port(value: u16) {
        AppConfig::set_field(|cfg| cfg.port = value);
    }

    pub fn set_grading_webhook_secret(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.grading_webhook_secret = value.into());
    }

    pub fn set_webhook_max_skew_seconds(value: i64) {
        AppConfig::set_field(|cfg| cfg.webhook_max_skew_seconds = value);
    }

    pub fn set_accept_partial_results(value: bool) {
        AppConfig::set_field(|cfg| cfg.accept_partial_results = value);
    }

    pub fn set_grading_timeout_seconds(value: i64) {
        AppConfig::set_field(|cfg| cfg.grading_timeout_seconds = value);
    }

    pub fn set_stuck_job_recovery_seconds(value: i64) {
        AppConfig::set_field(|cfg| cfg.stuck_job_recovery_seconds = value);
    }
}
