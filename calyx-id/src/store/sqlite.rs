//! SQLite implementation of the store traits
//!
//! List and trait columns are JSON text; containment filters are expressed
//! with `json_each` sub-selects. Nearest-neighbour search is a brute-force
//! cosine scan over every stored embedding, which is adequate for a catalogue
//! of a few thousand species.

use async_trait::async_trait;
use calyx_common::db::{
    CachedIdentification, FeedbackEntry, GrowingInfo, IdentificationCacheEntry, NewSpecies,
    PendingEmbedding, PetalCount, ScoredSpecies, SpeciesDetail, SpeciesSummary, TraitSet,
    EMBEDDING_DIM,
};
use calyx_common::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::{
    CacheStore, CandidateStore, CatalogueFilter, CatalogueStore, FeedbackStore, SortBy,
    SpeciesStore,
};
use crate::similarity::cosine_similarity;

const SUMMARY_COLUMNS: &str = "id, scientific_name, common_names, family, primary_image_url, \
     thumbnail_url, traits, native_region, bloom_season, search_count, created_at";

const CACHE_COLUMNS: &str =
    "id, image_hash, species_id, confidence, traits_extracted, method, hit_count, expires_at, created_at";

/// Store backed by the shared `calyx.db` pool
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn summary_by_id(&self, id: Uuid) -> Result<Option<SpeciesSummary>> {
        let row = sqlx::query(&format!("SELECT {} FROM species WHERE id = ?", SUMMARY_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(summary_from_row).transpose()
    }
}

/// Serialize an embedding as little-endian f32 bytes
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`encode_embedding`]
pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Internal(format!(
            "Embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn check_dimension(embedding: &[f32]) -> Result<()> {
    if embedding.len() != EMBEDDING_DIM {
        return Err(Error::InvalidInput(format!(
            "Embedding has {} dimensions, expected {}",
            embedding.len(),
            EMBEDDING_DIM
        )));
    }
    Ok(())
}

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Bad timestamp '{}': {}", value, e)))
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Bad id '{}': {}", value, e)))
}

fn json_column<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let raw: Option<String> = row.try_get(column)?;
    match raw {
        Some(text) if !text.trim().is_empty() => Ok(serde_json::from_str(&text)?),
        _ => Ok(T::default()),
    }
}

fn optional_timestamp(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.as_deref().map(parse_timestamp).transpose()
}

fn summary_from_row(row: &SqliteRow) -> Result<SpeciesSummary> {
    let id: String = row.try_get("id")?;

    Ok(SpeciesSummary {
        id: parse_uuid(&id)?,
        scientific_name: row.try_get("scientific_name")?,
        common_names: json_column(row, "common_names")?,
        family: row.try_get("family")?,
        primary_image_url: row.try_get("primary_image_url")?,
        thumbnail_url: row.try_get("thumbnail_url")?,
        traits: json_column(row, "traits")?,
        native_region: json_column(row, "native_region")?,
        bloom_season: json_column(row, "bloom_season")?,
        search_count: row.try_get("search_count")?,
        created_at: optional_timestamp(row, "created_at")?,
    })
}

fn detail_from_row(row: &SqliteRow) -> Result<SpeciesDetail> {
    let id: String = row.try_get("id")?;

    Ok(SpeciesDetail {
        id: parse_uuid(&id)?,
        scientific_name: row.try_get("scientific_name")?,
        common_names: json_column(row, "common_names")?,
        family: row.try_get("family")?,
        description: row.try_get("description")?,
        care_tips: row.try_get("care_tips")?,
        bloom_season: json_column(row, "bloom_season")?,
        traits: json_column(row, "traits")?,
        primary_image_url: row.try_get("primary_image_url")?,
        thumbnail_url: row.try_get("thumbnail_url")?,
        growing_info: GrowingInfo {
            native_region: json_column(row, "native_region")?,
            climate_zones: json_column(row, "climate_zones")?,
            hardiness_zones: row.try_get("hardiness_zones")?,
            light_requirement: row.try_get("light_requirement")?,
            water_needs: row.try_get("water_needs")?,
            soil_preference: row.try_get("soil_preference")?,
            ph_range: row.try_get("ph_range")?,
            growing_season: json_column(row, "growing_season")?,
            mature_height: row.try_get("mature_height")?,
            mature_spread: row.try_get("mature_spread")?,
            growth_rate: row.try_get("growth_rate")?,
        },
        search_count: row.try_get("search_count")?,
        created_at: optional_timestamp(row, "created_at")?,
        updated_at: optional_timestamp(row, "updated_at")?,
    })
}

fn cache_entry_from_row(row: &SqliteRow) -> Result<IdentificationCacheEntry> {
    let id: String = row.try_get("id")?;
    let species_id: String = row.try_get("species_id")?;
    let method: String = row.try_get("method")?;
    let expires_at: String = row.try_get("expires_at")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(IdentificationCacheEntry {
        id: parse_uuid(&id)?,
        image_hash: row.try_get("image_hash")?,
        species_id: parse_uuid(&species_id)?,
        confidence: row.try_get("confidence")?,
        traits_extracted: json_column(row, "traits_extracted")?,
        method: method.parse()?,
        hit_count: row.try_get("hit_count")?,
        expires_at: parse_timestamp(&expires_at)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

/// Escape `%`, `_` and the escape character itself for a LIKE pattern
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// ` AND EXISTS (element of <column>[<path>] equal to value)`
fn push_json_contains<'a, T>(qb: &mut QueryBuilder<'a, Sqlite>, column: &str, path: Option<&str>, value: T)
where
    T: 'a + sqlx::Encode<'a, Sqlite> + sqlx::Type<Sqlite> + Send,
{
    qb.push(" AND EXISTS (SELECT 1 FROM json_each(species.");
    qb.push(column);
    if let Some(path) = path {
        qb.push(", '");
        qb.push(path);
        qb.push("'");
    }
    qb.push(") WHERE value = ");
    qb.push_bind(value);
    qb.push(")");
}

fn push_catalogue_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &CatalogueFilter) {
    if let Some(name) = filter.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        qb.push(" AND (species.scientific_name LIKE ");
        qb.push_bind(format!("%{}%", escape_like(name)));
        qb.push(" ESCAPE '\\' OR EXISTS (SELECT 1 FROM json_each(species.common_names) WHERE value = ");
        qb.push_bind(name.to_string());
        qb.push("))");
    }

    if let Some(region) = filter.region.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        push_json_contains(qb, "native_region", None, region.to_string());
    }

    if let Some(color) = filter.color.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        push_json_contains(qb, "traits", Some("$.color_primary"), color.to_string());
    }
}

fn order_clause(sort: SortBy) -> &'static str {
    match sort {
        SortBy::Name => " ORDER BY species.scientific_name ASC",
        SortBy::Popularity => " ORDER BY species.search_count DESC, species.scientific_name ASC",
        SortBy::Recent => " ORDER BY species.created_at DESC, species.scientific_name ASC",
    }
}

#[async_trait]
impl CandidateStore for SqliteStore {
    async fn find_by_traits(&self, traits: &TraitSet, limit: i64) -> Result<Vec<SpeciesSummary>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM species WHERE 1 = 1",
            SUMMARY_COLUMNS
        ));

        for color in traits.wanted_colors() {
            push_json_contains(&mut qb, "traits", Some("$.color_primary"), color.to_string());
        }

        match traits.wanted_petal_count() {
            Some(PetalCount::Exact(n)) => {
                push_json_contains(&mut qb, "traits", Some("$.petal_count"), *n)
            }
            Some(PetalCount::Category(c)) => {
                push_json_contains(&mut qb, "traits", Some("$.petal_count"), c.trim().to_string())
            }
            None => {}
        }

        if let Some(size) = traits.flower_size {
            push_json_contains(&mut qb, "traits", Some("$.flower_size"), size.as_str().to_string());
        }

        qb.push(" ORDER BY species.scientific_name ASC LIMIT ");
        qb.push_bind(limit);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(summary_from_row).collect()
    }

    async fn nearest_by_embedding(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<ScoredSpecies>> {
        let rows = sqlx::query(&format!(
            "SELECT {}, embedding FROM species WHERE embedding IS NOT NULL",
            SUMMARY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::new();
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            let stored = decode_embedding(&blob)?;
            if let Some(similarity) = cosine_similarity(embedding, &stored) {
                if similarity > threshold {
                    scored.push(ScoredSpecies::new(summary_from_row(row)?, similarity));
                }
            }
        }

        scored.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        scored.truncate(limit);

        debug!(scanned = rows.len(), matched = scored.len(), "Embedding scan complete");
        Ok(scored)
    }

    async fn embeddings_for(&self, ids: &[Uuid]) -> Result<Vec<(SpeciesSummary, Option<Vec<f32>>)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {}, embedding FROM species WHERE id IN (",
            SUMMARY_COLUMNS
        ));
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id.to_string());
        }
        separated.push_unseparated(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let blob: Option<Vec<u8>> = row.try_get("embedding")?;
                let embedding = blob.as_deref().map(decode_embedding).transpose()?;
                Ok((summary_from_row(row)?, embedding))
            })
            .collect()
    }
}

#[async_trait]
impl SpeciesStore for SqliteStore {
    async fn text_search(&self, query: &str, limit: i64) -> Result<Vec<SpeciesSummary>> {
        let filter = CatalogueFilter {
            name: Some(query.to_string()),
            ..Default::default()
        };

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM species WHERE 1 = 1",
            SUMMARY_COLUMNS
        ));
        push_catalogue_filter(&mut qb, &filter);
        qb.push(order_clause(SortBy::Name));
        qb.push(" LIMIT ");
        qb.push_bind(limit);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(summary_from_row).collect()
    }

    async fn species_detail(&self, id: Uuid) -> Result<Option<SpeciesDetail>> {
        let row = sqlx::query("SELECT * FROM species WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(detail_from_row).transpose()
    }

    async fn popular(&self, limit: i64) -> Result<Vec<SpeciesSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM species ORDER BY search_count DESC, scientific_name ASC LIMIT ?",
            SUMMARY_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(summary_from_row).collect()
    }

    async fn species_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM species")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn increment_search_count(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE species SET search_count = search_count + 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_species(&self, species: &NewSpecies) -> Result<Uuid> {
        if species.scientific_name.trim().is_empty() {
            return Err(Error::InvalidInput("scientific_name must not be empty".to_string()));
        }
        if species.search_count < 0 {
            return Err(Error::InvalidInput("search_count must not be negative".to_string()));
        }

        let embedding = match &species.embedding {
            Some(embedding) => {
                check_dimension(embedding)?;
                Some(encode_embedding(embedding))
            }
            None => None,
        };

        let id = species.id.unwrap_or_else(Uuid::new_v4);
        let info = &species.growing_info;

        sqlx::query(
            r#"
            INSERT INTO species (
                id, scientific_name, common_names, family, description, care_tips,
                bloom_season, traits, primary_image_url, thumbnail_url,
                native_region, climate_zones, hardiness_zones, light_requirement,
                water_needs, soil_preference, ph_range, growing_season,
                mature_height, mature_spread, growth_rate, embedding, search_count,
                created_at
            )
            VALUES (
                ?, ?, ?, ?, ?, ?,
                ?, ?, ?, ?,
                ?, ?, ?, ?,
                ?, ?, ?, ?,
                ?, ?, ?, ?, ?,
                COALESCE(?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )
            "#,
        )
        .bind(id.to_string())
        .bind(species.scientific_name.trim())
        .bind(serde_json::to_string(&species.common_names)?)
        .bind(&species.family)
        .bind(&species.description)
        .bind(&species.care_tips)
        .bind(serde_json::to_string(&species.bloom_season)?)
        .bind(serde_json::to_string(&species.traits)?)
        .bind(&species.primary_image_url)
        .bind(&species.thumbnail_url)
        .bind(serde_json::to_string(&info.native_region)?)
        .bind(serde_json::to_string(&info.climate_zones)?)
        .bind(&info.hardiness_zones)
        .bind(&info.light_requirement)
        .bind(&info.water_needs)
        .bind(&info.soil_preference)
        .bind(&info.ph_range)
        .bind(serde_json::to_string(&info.growing_season)?)
        .bind(&info.mature_height)
        .bind(&info.mature_spread)
        .bind(&info.growth_rate)
        .bind(embedding)
        .bind(species.search_count)
        .bind(species.created_at.map(format_timestamp))
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn species_missing_embedding(&self) -> Result<Vec<PendingEmbedding>> {
        let rows = sqlx::query(
            "SELECT id, scientific_name, primary_image_url FROM species
             WHERE embedding IS NULL ORDER BY scientific_name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                Ok(PendingEmbedding {
                    id: parse_uuid(&id)?,
                    scientific_name: row.try_get("scientific_name")?,
                    primary_image_url: row.try_get("primary_image_url")?,
                })
            })
            .collect()
    }

    async fn set_embedding(&self, id: Uuid, embedding: &[f32]) -> Result<()> {
        check_dimension(embedding)?;

        let result = sqlx::query(
            "UPDATE species SET embedding = ?, updated_at = ? WHERE id = ?",
        )
        .bind(encode_embedding(embedding))
        .bind(format_timestamp(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Species {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogueStore for SqliteStore {
    async fn catalogue_page(
        &self,
        filter: &CatalogueFilter,
        sort: SortBy,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<SpeciesSummary>, i64)> {
        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM species WHERE 1 = 1");
        push_catalogue_filter(&mut count_qb, filter);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM species WHERE 1 = 1",
            SUMMARY_COLUMNS
        ));
        push_catalogue_filter(&mut qb, filter);
        qb.push(order_clause(sort));
        qb.push(" LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows = qb.build().fetch_all(&self.pool).await?;
        let items = rows.iter().map(summary_from_row).collect::<Result<Vec<_>>>()?;

        Ok((items, total))
    }

    async fn trait_and_region_values(&self) -> Result<Vec<(TraitSet, Vec<String>)>> {
        let rows = sqlx::query("SELECT traits, native_region FROM species")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| Ok((json_column(row, "traits")?, json_column(row, "native_region")?)))
            .collect()
    }

    async fn count_by_color(&self, color: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM species WHERE EXISTS (
                SELECT 1 FROM json_each(species.traits, '$.color_primary') WHERE value = ?
             )",
        )
        .bind(color)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_by_region(&self, region: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM species WHERE EXISTS (
                SELECT 1 FROM json_each(species.native_region) WHERE value = ?
             )",
        )
        .bind(region)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn find_valid(&self, image_hash: &str, now: DateTime<Utc>) -> Result<Option<CachedIdentification>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM identification_cache
             WHERE image_hash = ? AND expires_at > ?
             ORDER BY created_at DESC
             LIMIT 1",
            CACHE_COLUMNS
        ))
        .bind(image_hash)
        .bind(format_timestamp(now))
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let entry = cache_entry_from_row(&row)?;

        match self.summary_by_id(entry.species_id).await? {
            Some(species) => Ok(Some(CachedIdentification { entry, species })),
            None => {
                debug!(species_id = %entry.species_id, "Cache row points at a missing species");
                Ok(None)
            }
        }
    }

    async fn insert_entry(&self, entry: &IdentificationCacheEntry) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO identification_cache ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            CACHE_COLUMNS
        ))
        .bind(entry.id.to_string())
        .bind(&entry.image_hash)
        .bind(entry.species_id.to_string())
        .bind(entry.confidence)
        .bind(serde_json::to_string(&entry.traits_extracted)?)
        .bind(entry.method.as_str())
        .bind(entry.hit_count)
        .bind(format_timestamp(entry.expires_at))
        .bind(format_timestamp(entry.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_hit_count(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE identification_cache SET hit_count = hit_count + 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn usage_totals(&self) -> Result<(i64, i64)> {
        let totals: (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(hit_count), 0) FROM identification_cache",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(totals)
    }
}

#[async_trait]
impl FeedbackStore for SqliteStore {
    async fn insert_feedback(&self, entry: &FeedbackEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO identification_feedback
                (id, cache_id, user_confirmed, correct_species_id, notes, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(&entry.cache_id)
        .bind(entry.user_confirmed)
        .bind(&entry.correct_species_id)
        .bind(&entry.notes)
        .bind(format_timestamp(entry.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
