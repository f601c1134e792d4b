//! Database access for calyx-id

pub mod settings;

use calyx_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open (or create) `calyx.db` with the full schema
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    calyx_common::db::init_database(db_path).await
}
