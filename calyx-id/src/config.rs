//! Configuration resolution for calyx-id
//!
//! Vision token priority: Database → ENV → TOML. Operational parameters
//! (cache TTL, daily quota, backfill pause) live in the settings table.
//! Listen address and CORS origins come from CLI/TOML.

use calyx_common::config::TomlConfig;
use calyx_common::Result;
use sqlx::{Pool, Sqlite};
use std::time::Duration;
use tracing::{info, warn};

use crate::db::settings;

/// Environment variable holding the vision API token
pub const HF_TOKEN_ENV: &str = "CALYX_HF_TOKEN";

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8000";

/// Origins allowed when none are configured
pub const DEFAULT_CORS_ORIGINS: &[&str] = &["http://localhost:3000", "http://127.0.0.1:3000"];

/// Effective service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub bind_address: String,
    pub hf_token: Option<String>,
    pub vision_api_url: Option<String>,
    pub daily_quota: u32,
    pub cache_ttl_days: i64,
    pub backfill_pause: Duration,
    pub cors_origins: Vec<String>,
}

impl ServiceConfig {
    /// Assemble the configuration from settings table, environment and TOML
    pub async fn load(
        db: &Pool<Sqlite>,
        toml_config: &TomlConfig,
        bind_override: Option<String>,
    ) -> Result<Self> {
        let bind_address = bind_override
            .or_else(|| toml_config.bind_address.clone())
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let cors_origins = if toml_config.cors_origins.is_empty() {
            DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect()
        } else {
            toml_config.cors_origins.clone()
        };

        Ok(Self {
            bind_address,
            hf_token: resolve_hf_token(db, toml_config).await?,
            vision_api_url: toml_config.vision_api_url.clone(),
            daily_quota: settings::get_vision_daily_quota(db).await?,
            cache_ttl_days: settings::get_cache_ttl_days(db).await?,
            backfill_pause: Duration::from_millis(settings::get_backfill_pause_ms(db).await?),
            cors_origins,
        })
    }
}

/// Resolve the vision API token from 3-tier configuration
///
/// **Priority:** Database → ENV → TOML. A missing token is not an error: the
/// service then runs with the histogram classifier only.
pub async fn resolve_hf_token(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<Option<String>> {
    let db_token = settings::get_hf_token(db).await?.filter(|t| is_valid_token(t));
    let env_token = std::env::var(HF_TOKEN_ENV).ok().filter(|t| is_valid_token(t));
    let toml_token = toml_config.hf_token.clone().filter(|t| is_valid_token(t));

    let sources: Vec<&str> = [
        db_token.as_ref().map(|_| "database"),
        env_token.as_ref().map(|_| "environment"),
        toml_token.as_ref().map(|_| "TOML"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if sources.len() > 1 {
        warn!(
            "Vision API token found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(token) = db_token {
        info!("Vision API token loaded from database");
        return Ok(Some(token));
    }
    if let Some(token) = env_token {
        info!("Vision API token loaded from environment variable");
        return Ok(Some(token));
    }
    if let Some(token) = toml_token {
        info!("Vision API token loaded from TOML config");
        return Ok(Some(token));
    }

    warn!(
        "Vision API token not configured; traits will come from the color histogram and \
         identification will be unavailable. Set {} or hf_token in calyx-id.toml.",
        HF_TOKEN_ENV
    );
    Ok(None)
}

/// Token must be non-empty and not just whitespace
pub fn is_valid_token(token: &str) -> bool {
    !token.trim().is_empty()
}
