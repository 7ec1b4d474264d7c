//! Settings table accessors (key-value, highest-priority configuration tier)

use dcr_common::{Error, Result};
use sqlx::{Pool, Sqlite};

pub const REVIEW_THRESHOLD: &str = "review_threshold";
pub const WORKER_COUNT: &str = "worker_count";
pub const STALENESS_WINDOW_MINUTES: &str = "staleness_window_minutes";
pub const TARGET_CHANNEL: &str = "target_channel";
pub const KNOWLEDGE_CACHE_CAPACITY: &str = "knowledge_cache_capacity";
pub const DB_MAX_LOCK_WAIT_MS: &str = "db_max_lock_wait_ms";

/// Read and parse a setting. `None` when the key is absent.
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match row {
        Some((value,)) => {
            let parsed = value
                .trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting {} failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}

/// Lock-wait budget for `retry_on_lock` (default 5000ms)
pub async fn get_max_lock_wait_ms(db: &Pool<Sqlite>) -> Result<u64> {
    get_setting(db, DB_MAX_LOCK_WAIT_MS)
        .await
        .map(|opt| opt.unwrap_or(5000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;

    async fn setup() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query("CREATE TABLE settings (key TEXT PRIMARY KEY, value TEXT NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn missing_setting_is_none() {
        let pool = setup().await;
        let value: Option<u8> = get_setting(&pool, REVIEW_THRESHOLD).await.unwrap();
        assert!(value.is_none());
        assert_eq!(get_max_lock_wait_ms(&pool).await.unwrap(), 5000);
    }

    #[tokio::test]
    async fn set_then_get_overwrites() {
        let pool = setup().await;
        set_setting(&pool, WORKER_COUNT, 2).await.unwrap();
        set_setting(&pool, WORKER_COUNT, 8).await.unwrap();
        let value: Option<usize> = get_setting(&pool, WORKER_COUNT).await.unwrap();
        assert_eq!(value, Some(8));
    }

    #[tokio::test]
    async fn unparsable_setting_is_config_error() {
        let pool = setup().await;
        set_setting(&pool, REVIEW_THRESHOLD, "high").await.unwrap();
        let result: Result<Option<u8>> = get_setting(&pool, REVIEW_THRESHOLD).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
