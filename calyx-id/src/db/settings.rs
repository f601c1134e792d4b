//! Settings database operations
//!
//! Typed get/set accessors over the `settings` key-value table. The database
//! is the authoritative source for operational parameters; defaults apply
//! when a key is missing.

use calyx_common::{Error, Result};
use sqlx::{Pool, Sqlite};

#[cfg(test)]
use sqlx::SqlitePool;

/// Default cache entry lifetime
pub const DEFAULT_CACHE_TTL_DAYS: i64 = 7;

/// Default primary vision calls per UTC day
pub const DEFAULT_VISION_DAILY_QUOTA: u32 = 1000;

/// Default pause between species during embedding backfill
pub const DEFAULT_BACKFILL_PAUSE_MS: u64 = 3000;

/// Get the vision API token from the database
pub async fn get_hf_token(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, "hf_token").await
}

/// Store the vision API token in the database
pub async fn set_hf_token(db: &Pool<Sqlite>, token: String) -> Result<()> {
    set_setting(db, "hf_token", token).await
}

/// Identification cache lifetime in days
///
/// **Default:** 7
pub async fn get_cache_ttl_days(db: &Pool<Sqlite>) -> Result<i64> {
    get_setting(db, "cache_ttl_days")
        .await
        .map(|opt| opt.unwrap_or(DEFAULT_CACHE_TTL_DAYS))
}

/// Primary vision calls allowed per UTC day
///
/// **Default:** 1000
pub async fn get_vision_daily_quota(db: &Pool<Sqlite>) -> Result<u32> {
    get_setting(db, "vision_daily_quota")
        .await
        .map(|opt| opt.unwrap_or(DEFAULT_VISION_DAILY_QUOTA))
}

/// Pause between species during embedding backfill
///
/// **Default:** 3000 ms
pub async fn get_backfill_pause_ms(db: &Pool<Sqlite>) -> Result<u64> {
    get_setting(db, "backfill_pause_ms")
        .await
        .map(|opt| opt.unwrap_or(DEFAULT_BACKFILL_PAUSE_MS))
}

/// Generic setting getter
///
/// NULL values read as missing.
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(Option<String>,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((Some(value),)) => {
            let parsed = value
                .trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

/// Generic setting setter (upsert)
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        calyx_common::db::init::create_settings_table(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_defaults_when_missing() {
        let pool = setup_test_db().await;

        assert_eq!(get_cache_ttl_days(&pool).await.unwrap(), DEFAULT_CACHE_TTL_DAYS);
        assert_eq!(get_vision_daily_quota(&pool).await.unwrap(), DEFAULT_VISION_DAILY_QUOTA);
        assert_eq!(get_backfill_pause_ms(&pool).await.unwrap(), DEFAULT_BACKFILL_PAUSE_MS);
        assert_eq!(get_hf_token(&pool).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let pool = setup_test_db().await;

        set_setting(&pool, "cache_ttl_days", 30).await.unwrap();
        set_hf_token(&pool, "hf_abc".to_string()).await.unwrap();

        assert_eq!(get_cache_ttl_days(&pool).await.unwrap(), 30);
        assert_eq!(get_hf_token(&pool).await.unwrap().as_deref(), Some("hf_abc"));
    }

    #[tokio::test]
    async fn test_upsert_keeps_single_row() {
        let pool = setup_test_db().await;

        set_setting(&pool, "vision_daily_quota", 10).await.unwrap();
        set_setting(&pool, "vision_daily_quota", 20).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM settings WHERE key = 'vision_daily_quota'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(get_vision_daily_quota(&pool).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_null_value_reads_as_missing() {
        let pool = setup_test_db().await;
        sqlx::query("INSERT INTO settings (key, value) VALUES ('cache_ttl_days', NULL)")
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(get_cache_ttl_days(&pool).await.unwrap(), DEFAULT_CACHE_TTL_DAYS);
    }

    #[tokio::test]
    async fn test_unparsable_value_is_config_error() {
        let pool = setup_test_db().await;
        set_setting(&pool, "vision_daily_quota", "lots").await.unwrap();

        assert!(matches!(get_vision_daily_quota(&pool).await, Err(Error::Config(_))));
    }
}
