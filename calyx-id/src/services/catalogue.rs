//! Catalogue browsing
//!
//! Name, region and single-color filters run inside the store. A request for
//! several colors cannot be expressed as one containment test, so it is
//! applied to the fetched page instead: `total` and the page math then refer
//! to the collection without the color filter, and the page may hold fewer
//! rows than `limit`. Responses flag this with `post_filtered`.

use calyx_common::db::SpeciesSummary;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

use crate::pagination::{calculate_pagination, PageRequest, DEFAULT_PAGE_SIZE};
use crate::store::{CatalogueFilter, CatalogueStore, SortBy};

/// Request-scoped catalogue query
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogueQuery {
    pub name: Option<String>,
    pub colors: Vec<String>,
    pub region: Option<String>,
    pub sort: SortBy,
    pub page: i64,
    pub limit: i64,
}

impl Default for CatalogueQuery {
    fn default() -> Self {
        Self {
            name: None,
            colors: Vec::new(),
            region: None,
            sort: SortBy::Name,
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl CatalogueQuery {
    /// Split a comma-separated color list, dropping blanks and repeats
    ///
    /// Values keep their case; stored colors are matched exactly.
    pub fn parse_colors(raw: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        raw.split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty() && seen.insert(c.clone()))
            .collect()
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Store-reported match count, before any post-filtering
    pub total: i64,
    pub page: i64,
    pub pages: i64,
    /// Same as `pages`, under the name front-ends read
    pub total_pages: i64,
    pub limit: i64,
    pub has_next: bool,
    pub has_prev: bool,
    /// True when a multi-color filter was applied to this page only
    pub post_filtered: bool,
}

impl<T> Page<T> {
    fn empty(request: PageRequest) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            page: request.page,
            pages: 0,
            total_pages: 0,
            limit: request.limit,
            has_next: false,
            has_prev: false,
            post_filtered: false,
        }
    }
}

/// Selectable filter value with its species count
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterOption {
    pub value: String,
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortOption {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub colors: Vec<FilterOption>,
    pub countries: Vec<FilterOption>,
    pub sort_options: Vec<SortOption>,
}

pub struct CatalogueService {
    store: Arc<dyn CatalogueStore>,
}

impl CatalogueService {
    pub fn new(store: Arc<dyn CatalogueStore>) -> Self {
        Self { store }
    }

    /// Filtered, sorted page; store errors yield an empty page
    pub async fn query(&self, query: &CatalogueQuery) -> Page<SpeciesSummary> {
        let request = PageRequest::new(query.page, query.limit);
        let post_filtered = query.colors.len() > 1;

        let filter = CatalogueFilter {
            name: query.name.clone(),
            region: query.region.clone(),
            color: match query.colors.as_slice() {
                [single] => Some(single.clone()),
                _ => None,
            },
        };

        let (mut items, total) = match self
            .store
            .catalogue_page(&filter, query.sort, request.limit, request.offset)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Catalogue query failed, returning empty page");
                return Page::empty(request);
            }
        };

        if post_filtered {
            items.retain(|species| species.traits.has_any_color(&query.colors));
        }

        let pagination = calculate_pagination(total, request);
        Page {
            items,
            total,
            page: pagination.page,
            pages: pagination.total_pages,
            total_pages: pagination.total_pages,
            limit: pagination.limit,
            has_next: pagination.has_next,
            has_prev: pagination.has_prev,
            post_filtered,
        }
    }

    /// Distinct colors and regions with per-value counts
    ///
    /// One count query per distinct value; failures degrade to an empty list
    /// (enumeration) or a zero count (single value).
    pub async fn available_filters(&self) -> FilterOptions {
        let values = match self.store.trait_and_region_values().await {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "Filter enumeration failed");
                return FilterOptions {
                    sort_options: sort_options(),
                    ..Default::default()
                };
            }
        };

        let mut colors = BTreeSet::new();
        let mut regions = BTreeSet::new();
        for (traits, native_region) in values {
            colors.extend(traits.wanted_colors().into_iter().map(str::to_string));
            regions.extend(native_region.into_iter().filter(|r| !r.trim().is_empty()));
        }

        let mut color_options = Vec::with_capacity(colors.len());
        for color in colors {
            let count = self.store.count_by_color(&color).await.unwrap_or_else(|e| {
                warn!(%color, error = %e, "Color count failed");
                0
            });
            color_options.push(FilterOption {
                label: capitalize(&color),
                value: color,
                count,
            });
        }

        let mut country_options = Vec::with_capacity(regions.len());
        for region in regions {
            let count = self.store.count_by_region(&region).await.unwrap_or_else(|e| {
                warn!(%region, error = %e, "Region count failed");
                0
            });
            country_options.push(FilterOption {
                label: region.clone(),
                value: region,
                count,
            });
        }

        FilterOptions {
            colors: color_options,
            countries: country_options,
            sort_options: sort_options(),
        }
    }
}

fn sort_options() -> Vec<SortOption> {
    SortBy::all()
        .into_iter()
        .map(|sort| SortOption {
            value: sort.as_str().to_string(),
            label: match sort {
                SortBy::Name => "Name (A-Z)",
                SortBy::Popularity => "Most popular",
                SortBy::Recent => "Recently added",
            }
            .to_string(),
        })
        .collect()
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
