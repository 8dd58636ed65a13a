//! Store configuration.
//!
//! Connection parameters come from the environment, the same variables the
//! bot has always used (`DB_HOST`, `DB_NAME`, ...). Cache and classifier
//! settings live in `quill-cache` and are aggregated here.

use std::time::Duration;

use deadpool_postgres::{Config, ManagerConfig, PoolConfig, RecyclingMethod, Runtime};
use quill_cache::{CacheConfig, ClassifierConfig};
use secrecy::{ExposeSecret, SecretString};
use tokio_postgres::NoTls;

use crate::error::{StoreError, StoreResult};
use crate::pg::PgPool;

// ============================================================================
// DEFAULTS
// ============================================================================

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_NAME: &str = "discord_bot";
pub const DEFAULT_DB_USER: &str = "postgres";
pub const DEFAULT_POOL_MIN_SIZE: usize = 1;
pub const DEFAULT_POOL_MAX_SIZE: usize = 10;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: SecretString,
    /// Connections opened eagerly at startup
    pub min_size: usize,
    /// Maximum pool size
    pub max_size: usize,
    /// Server-side statement timeout
    pub command_timeout: Duration,
    /// How long `acquire` waits on a saturated pool
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            dbname: DEFAULT_DB_NAME.to_string(),
            user: DEFAULT_DB_USER.to_string(),
            password: SecretString::new("".into()),
            min_size: DEFAULT_POOL_MIN_SIZE,
            max_size: DEFAULT_POOL_MAX_SIZE,
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `DB_HOST` (default: localhost)
    /// - `DB_PORT` (default: 5432)
    /// - `DB_NAME` (default: discord_bot)
    /// - `DB_USER` (default: postgres)
    /// - `DB_PASSWORD` (default: empty)
    /// - `DB_POOL_MIN` (default: 1)
    /// - `DB_POOL_MAX` (default: 10)
    /// - `DB_COMMAND_TIMEOUT_SECS` (default: 60)
    /// - `DB_ACQUIRE_TIMEOUT_SECS` (default: 30)
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("DB_HOST").unwrap_or_else(|_| DEFAULT_DB_HOST.to_string()),
            port: std::env::var("DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DB_PORT),
            dbname: std::env::var("DB_NAME").unwrap_or_else(|_| DEFAULT_DB_NAME.to_string()),
            user: std::env::var("DB_USER").unwrap_or_else(|_| DEFAULT_DB_USER.to_string()),
            password: SecretString::new(std::env::var("DB_PASSWORD").unwrap_or_default().into()),
            min_size: std::env::var("DB_POOL_MIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_POOL_MIN_SIZE),
            max_size: std::env::var("DB_POOL_MAX")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_POOL_MAX_SIZE),
            command_timeout: Duration::from_secs(
                std::env::var("DB_COMMAND_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
            ),
            acquire_timeout: Duration::from_secs(
                std::env::var("DB_ACQUIRE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            ),
        }
    }

    /// Reject settings the pool cannot honour.
    pub fn validate(&self) -> StoreResult<()> {
        if self.max_size == 0 {
            return Err(StoreError::config("max_size", "must be greater than zero"));
        }
        if self.min_size > self.max_size {
            return Err(StoreError::config(
                "min_size",
                format!("{} exceeds max_size {}", self.min_size, self.max_size),
            ));
        }
        if self.host.is_empty() {
            return Err(StoreError::config("host", "must not be empty"));
        }
        Ok(())
    }

    /// Create a connection pool from this configuration.
    ///
    /// No connection is opened here; see `Store::connect` for warm-up.
    pub fn create_pool(&self) -> StoreResult<PgPool> {
        self.validate()?;

        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.expose_secret().to_string());
        cfg.options = Some(format!(
            "-c statement_timeout={}",
            self.command_timeout.as_millis()
        ));

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(self.max_size);
        pool_config.timeouts.wait = Some(self.acquire_timeout);
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::connection(format!("Failed to create pool: {}", e)))?;

        tracing::info!(
            host = %self.host,
            port = self.port,
            dbname = %self.dbname,
            max_size = self.max_size,
            "Database pool created"
        );

        Ok(PgPool::new(pool))
    }
}

// ============================================================================
// STORE CONFIGURATION
// ============================================================================

/// Everything needed to build a `Store`.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub db: DbConfig,
    pub cache: CacheConfig,
    pub classifier: ClassifierConfig,
}

impl StoreConfig {
    /// Database and cache settings from the environment; default classifier.
    pub fn from_env() -> Self {
        Self {
            db: DbConfig::from_env(),
            cache: CacheConfig::from_env(),
            classifier: ClassifierConfig::default(),
        }
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_classifier(mut self, classifier: ClassifierConfig) -> Self {
        self.classifier = classifier;
        self
    }
}
