//! Configuration loaded from environment variables, following the same
//! `env::var` + typed-default + `OnceLock`-cached-accessor idiom used
//! throughout this codebase.

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::{Error, Result};

/// Every tunable named across the component design, collapsed into a single
/// nested record so unknown environment keys are simply ignored but a
/// *recognized* key with an unparseable value is a configuration error.
#[derive(Debug, Clone)]
pub struct Config {
    // Concurrency
    pub max_concurrent: usize,

    // File locking
    pub lock_timeout_secs: u64,
    pub lock_stale_timeout_secs: u64,
    pub lock_poll_interval_ms: u64,

    // Vectorization
    pub embedding_dimension: usize,
    pub embedding_batch_size: usize,
    pub max_text_length: usize,

    // Fusion
    pub max_source_sentences: usize,

    // Database pool
    pub database_url: String,
    pub db_pool_min_size: u32,
    pub db_pool_max_size: u32,
    pub db_pool_timeout_secs: u64,
    pub auto_migrate: bool,

    // Per-call deadlines
    pub llm_timeout_secs: u64,
    pub embedding_timeout_secs: u64,
    pub store_command_timeout_secs: u64,

    // Retry / circuit breaker
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_reset_secs: u64,

    // Filesystem layout roots
    pub data_root: PathBuf,
    pub annual_reports_dir: PathBuf,
    pub research_reports_dir: PathBuf,
    pub extracted_dir: PathBuf,
    pub checkpoints_dir: PathBuf,
    pub locks_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            lock_timeout_secs: 30,
            lock_stale_timeout_secs: 180,
            lock_poll_interval_ms: 100,
            embedding_dimension: 2560,
            embedding_batch_size: 50,
            max_text_length: 8000,
            max_source_sentences: 20,
            database_url: "postgres://localhost/ashare".to_string(),
            db_pool_min_size: 5,
            db_pool_max_size: 20,
            db_pool_timeout_secs: 30,
            auto_migrate: false,
            llm_timeout_secs: 180,
            embedding_timeout_secs: 300,
            store_command_timeout_secs: 60,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 10_000,
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_secs: 30,
            data_root: PathBuf::from("data"),
            annual_reports_dir: PathBuf::from("data/annual_reports"),
            research_reports_dir: PathBuf::from("data/research_reports"),
            extracted_dir: PathBuf::from("data/extracted"),
            checkpoints_dir: PathBuf::from("data/temp/checkpoints"),
            locks_dir: PathBuf::from("data/temp/locks"),
        }
    }
}

impl Config {
    pub fn store_command_timeout(&self) -> Duration {
        Duration::from_secs(self.store_command_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Load configuration from `ASHARE_`-prefixed environment variables,
    /// falling back to defaults. A recognized variable holding an
    /// unparseable value is a `Configuration` error (Fatal), not a silently
    /// ignored default.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(v) = env_usize("ASHARE_MAX_CONCURRENT")? {
            cfg.max_concurrent = v;
        }
        if let Some(v) = env_u64("ASHARE_LOCK_TIMEOUT_SECS")? {
            cfg.lock_timeout_secs = v;
        }
        if let Some(v) = env_u64("ASHARE_LOCK_STALE_TIMEOUT_SECS")? {
            cfg.lock_stale_timeout_secs = v;
        }
        if let Some(v) = env_u64("ASHARE_LOCK_POLL_INTERVAL_MS")? {
            cfg.lock_poll_interval_ms = v;
        }
        if let Some(v) = env_usize("ASHARE_EMBEDDING_DIMENSION")? {
            cfg.embedding_dimension = v;
        }
        if let Some(v) = env_usize("ASHARE_EMBEDDING_BATCH_SIZE")? {
            cfg.embedding_batch_size = v;
        }
        if let Some(v) = env_usize("ASHARE_MAX_TEXT_LENGTH")? {
            cfg.max_text_length = v;
        }
        if let Some(v) = env_usize("ASHARE_MAX_SOURCE_SENTENCES")? {
            cfg.max_source_sentences = v;
        }
        if let Ok(v) = env::var("ASHARE_DATABASE_URL") {
            cfg.database_url = v;
        }
        if let Some(v) = env_u32("ASHARE_DB_POOL_MIN_SIZE")? {
            cfg.db_pool_min_size = v;
        }
        if let Some(v) = env_u32("ASHARE_DB_POOL_MAX_SIZE")? {
            cfg.db_pool_max_size = v;
        }
        if let Some(v) = env_u64("ASHARE_DB_POOL_TIMEOUT_SECS")? {
            cfg.db_pool_timeout_secs = v;
        }
        if let Some(v) = env_bool("ASHARE_AUTO_MIGRATE")? {
            cfg.auto_migrate = v;
        }
        if let Some(v) = env_u64("ASHARE_LLM_TIMEOUT_SECS")? {
            cfg.llm_timeout_secs = v;
        }
        if let Some(v) = env_u64("ASHARE_EMBEDDING_TIMEOUT_SECS")? {
            cfg.embedding_timeout_secs = v;
        }
        if let Some(v) = env_u64("ASHARE_STORE_COMMAND_TIMEOUT_SECS")? {
            cfg.store_command_timeout_secs = v;
        }
        if let Some(v) = env_u32("ASHARE_RETRY_MAX_ATTEMPTS")? {
            cfg.retry_max_attempts = v;
        }
        if let Some(v) = env_u64("ASHARE_RETRY_BASE_DELAY_MS")? {
            cfg.retry_base_delay_ms = v;
        }
        if let Some(v) = env_u64("ASHARE_RETRY_MAX_DELAY_MS")? {
            cfg.retry_max_delay_ms = v;
        }
        if let Ok(v) = env::var("ASHARE_DATA_ROOT") {
            let root = PathBuf::from(v);
            cfg.annual_reports_dir = root.join("annual_reports");
            cfg.research_reports_dir = root.join("research_reports");
            cfg.extracted_dir = root.join("extracted");
            cfg.checkpoints_dir = root.join("temp").join("checkpoints");
            cfg.locks_dir = root.join("temp").join("locks");
            cfg.data_root = root;
        }

        Ok(cfg)
    }
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    parse_env(key)
}

fn env_u32(key: &str) -> Result<Option<u32>> {
    parse_env(key)
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    parse_env(key)
}

fn env_bool(key: &str) -> Result<Option<bool>> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(Error::Configuration(format!(
                "{key}: expected a boolean, got {raw:?}"
            ))),
        },
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => {
            Err(Error::Configuration(format!("{key}: not valid unicode")))
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Configuration(format!("{key}: invalid value {raw:?}"))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => {
            Err(Error::Configuration(format!("{key}: not valid unicode")))
        }
    }
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Load (once) and return the process-wide configuration. Panics only if
/// an `ASHARE_*` variable is present but unparseable; callers that need a
/// recoverable path should call [`Config::from_env`] directly instead.
pub fn global_config() -> &'static Config {
    CONFIG.get_or_init(|| Config::from_env().expect("invalid ASHARE_* environment configuration"))
}
