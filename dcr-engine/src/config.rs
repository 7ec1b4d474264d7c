//! Engine configuration resolution
//!
//! Every setting is resolved with Database → ENV → TOML → default priority.
//! Environment variables use the `DCR_` prefix and the upper-cased key
//! (`DCR_REVIEW_THRESHOLD`, `DCR_WORKER_COUNT`...).

use dcr_common::config::TomlConfig;
use dcr_common::{Error, Result};
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use std::fmt::Display;
use std::str::FromStr;
use tracing::{info, warn};

use crate::db::settings;

/// Resolved engine settings, fixed for the lifetime of one batch run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineConfig {
    /// Results below this confidence need human review
    pub review_threshold: u8,
    /// Concurrent matches per batch
    pub worker_count: usize,
    /// A corrected Knowledge Base entry is not used by the cached phase for this long
    pub staleness_window_minutes: i64,
    /// Sales channel whose prices are diffed and written
    pub target_channel: String,
    pub knowledge_cache_capacity: usize,
    pub db_max_lock_wait_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            review_threshold: 70,
            worker_count: 4,
            staleness_window_minutes: 60,
            target_channel: "b2b".to_string(),
            knowledge_cache_capacity: 10_000,
            db_max_lock_wait_ms: 5000,
        }
    }
}

impl EngineConfig {
    /// Resolve every setting from the database, environment and TOML file
    pub async fn resolve(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<Self> {
        let defaults = EngineConfig::default();
        let engine = &toml_config.engine;

        let config = EngineConfig {
            review_threshold: resolve_setting(
                db,
                settings::REVIEW_THRESHOLD,
                engine.review_threshold,
                defaults.review_threshold,
            )
            .await?,
            worker_count: resolve_setting(
                db,
                settings::WORKER_COUNT,
                engine.worker_count,
                defaults.worker_count,
            )
            .await?,
            staleness_window_minutes: resolve_setting(
                db,
                settings::STALENESS_WINDOW_MINUTES,
                engine.staleness_window_minutes,
                defaults.staleness_window_minutes,
            )
            .await?,
            target_channel: resolve_setting(
                db,
                settings::TARGET_CHANNEL,
                engine.target_channel.clone(),
                defaults.target_channel,
            )
            .await?,
            knowledge_cache_capacity: resolve_setting(
                db,
                settings::KNOWLEDGE_CACHE_CAPACITY,
                engine.knowledge_cache_capacity,
                defaults.knowledge_cache_capacity,
            )
            .await?,
            db_max_lock_wait_ms: resolve_setting(
                db,
                settings::DB_MAX_LOCK_WAIT_MS,
                engine.db_max_lock_wait_ms,
                defaults.db_max_lock_wait_ms,
            )
            .await?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.review_threshold > 100 {
            return Err(Error::Config(format!(
                "review_threshold must be 0-100 (got {})",
                self.review_threshold
            )));
        }
        if self.worker_count == 0 {
            return Err(Error::Config("worker_count must be at least 1".to_string()));
        }
        if self.staleness_window_minutes < 0 {
            return Err(Error::Config(
                "staleness_window_minutes must not be negative".to_string(),
            ));
        }
        if self.target_channel.trim().is_empty() {
            return Err(Error::Config("target_channel must not be empty".to_string()));
        }
        if self.knowledge_cache_capacity == 0 {
            return Err(Error::Config(
                "knowledge_cache_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn staleness_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.staleness_window_minutes)
    }
}

/// Environment variable name for a settings key
pub fn env_var_name(key: &str) -> String {
    format!("DCR_{}", key.to_uppercase())
}

/// Resolve one setting with Database → ENV → TOML → default priority
async fn resolve_setting<T>(
    db: &Pool<Sqlite>,
    key: &str,
    toml_value: Option<T>,
    default: T,
) -> Result<T>
where
    T: FromStr + Display + Clone,
    T::Err: Display,
{
    let db_value: Option<T> = settings::get_setting(db, key).await?;

    let env_name = env_var_name(key);
    let env_value: Option<T> = match std::env::var(&env_name) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().parse::<T>() {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Ignoring {}={:?}: {}", env_name, raw, e);
                None
            }
        },
        _ => None,
    };

    let mut sources = Vec::new();
    if db_value.is_some() {
        sources.push("database");
    }
    if env_value.is_some() {
        sources.push("environment");
    }
    if toml_value.is_some() {
        sources.push("TOML");
    }
    if sources.len() > 1 {
        warn!(
            "Setting {} found in multiple sources: {}. Using {} (highest priority).",
            key,
            sources.join(", "),
            sources[0]
        );
    }

    let value = db_value.or(env_value).or(toml_value);
    match value {
        Some(v) => {
            info!("Setting {} = {} (from {})", key, v, sources[0]);
            Ok(v)
        }
        None => Ok(default),
    }
}
