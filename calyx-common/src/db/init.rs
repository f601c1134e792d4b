//! Database initialization
//!
//! Creates the database on first run and brings the schema up to date on
//! every start. All statements are idempotent.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default operational settings written on first start
pub const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    ("cache_ttl_days", "7"),
    ("vision_daily_quota", "1000"),
    ("backfill_pause_ms", "3000"),
];

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Per-connection pragmas: foreign keys, WAL (concurrent readers alongside
    // the single writer) and a busy timeout for lock contention
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;
    init_default_settings(&pool).await?;

    Ok(pool)
}

/// Create all Calyx tables on an open pool
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_species_table(pool).await?;
    create_identification_cache_table(pool).await?;
    create_identification_feedback_table(pool).await?;
    Ok(())
}

/// Create the settings table
///
/// Stores application configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the species table
///
/// List-valued columns (`common_names`, `native_region`, ...) and `traits`
/// hold JSON text so they can be searched with `json_each`. `embedding` is a
/// BLOB of 384 little-endian f32 values, NULL until backfilled.
async fn create_species_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS species (
            id TEXT PRIMARY KEY,
            scientific_name TEXT NOT NULL UNIQUE,
            common_names TEXT NOT NULL DEFAULT '[]',
            family TEXT,
            description TEXT,
            care_tips TEXT,
            bloom_season TEXT NOT NULL DEFAULT '[]',
            traits TEXT NOT NULL DEFAULT '{}',
            primary_image_url TEXT,
            thumbnail_url TEXT,
            native_region TEXT NOT NULL DEFAULT '[]',
            climate_zones TEXT NOT NULL DEFAULT '[]',
            hardiness_zones TEXT,
            light_requirement TEXT,
            water_needs TEXT,
            soil_preference TEXT,
            ph_range TEXT,
            growing_season TEXT NOT NULL DEFAULT '[]',
            mature_height TEXT,
            mature_spread TEXT,
            growth_rate TEXT,
            embedding BLOB,
            search_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            CHECK (search_count >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_species_search_count ON species(search_count)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_species_created_at ON species(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the identification cache table
///
/// `image_hash` is deliberately not UNIQUE: concurrent cold requests for the
/// same image may each insert a row, and lookups pick the newest one.
/// `confidence` holds a raw cosine similarity after refinement, so it is only
/// bounded to [-1, 1].
async fn create_identification_cache_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS identification_cache (
            id TEXT PRIMARY KEY,
            image_hash TEXT NOT NULL,
            species_id TEXT NOT NULL REFERENCES species(id) ON DELETE CASCADE,
            confidence REAL NOT NULL,
            traits_extracted TEXT NOT NULL DEFAULT '{}',
            method TEXT NOT NULL,
            hit_count INTEGER NOT NULL DEFAULT 0,
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            CHECK (length(image_hash) = 64),
            CHECK (confidence >= -1.0 AND confidence <= 1.0),
            CHECK (method IN ('trait_elimination', 'vector_match', 'cache_hit')),
            CHECK (hit_count >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_identification_cache_hash ON identification_cache(image_hash, expires_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the feedback table
///
/// `cache_id` has no foreign key: feedback is accepted for any id.
async fn create_identification_feedback_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS identification_feedback (
            id TEXT PRIMARY KEY,
            cache_id TEXT NOT NULL,
            user_confirmed INTEGER NOT NULL,
            correct_species_id TEXT,
            notes TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize default settings
///
/// Existing values are left untouched; NULL values are reset to defaults.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    for (key, value) in DEFAULT_SETTINGS {
        ensure_setting(pool, key, value).await?;
    }
    Ok(())
}

async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let current: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    match current {
        Some(Some(_)) => Ok(()),
        Some(None) => {
            sqlx::query("UPDATE settings SET value = ?, updated_at = CURRENT_TIMESTAMP WHERE key = ?")
                .bind(default_value)
                .bind(key)
                .execute(pool)
                .await?;
            info!("Reset NULL setting '{}' to default value: {}", key, default_value);
            Ok(())
        }
        None => {
            // INSERT OR IGNORE: another process may initialize concurrently
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(default_value)
                .execute(pool)
                .await?;
            info!("Initialized setting '{}' with default value: {}", key, default_value);
            Ok(())
        }
    }
}
