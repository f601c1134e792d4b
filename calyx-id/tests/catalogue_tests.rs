//! Catalogue browsing against a seeded database

mod common;

use calyx_common::db::FlowerSize;
use calyx_id::services::{CatalogueQuery, CatalogueService};
use calyx_id::store::{SortBy, SpeciesStore, SqliteStore};
use common::{create_test_db, new_species, traits};
use std::sync::Arc;

async fn catalogue_with(count: usize, color_of: impl Fn(usize) -> &'static str) -> (tempfile::TempDir, CatalogueService) {
    let (dir, pool) = create_test_db().await;
    let store = Arc::new(SqliteStore::new(pool));

    for i in 0..count {
        let mut species = new_species(&format!("Species {:03}", i), traits(&[color_of(i)], 5, FlowerSize::Medium));
        species.growing_info.native_region = vec![if i % 3 == 0 { "JP" } else { "US" }.to_string()];
        species.search_count = i as i64;
        store.insert_species(&species).await.unwrap();
    }

    (dir, CatalogueService::new(store))
}

#[tokio::test]
async fn test_pagination_over_45_items() {
    let (_dir, catalogue) = catalogue_with(45, |_| "white").await;

    let page = catalogue.query(&CatalogueQuery::default()).await;
    assert_eq!(page.total, 45);
    assert_eq!(page.pages, 3);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.items.len(), 20);
    assert!(page.has_next);
    assert!(!page.has_prev);

    let last = catalogue
        .query(&CatalogueQuery {
            page: 3,
            ..Default::default()
        })
        .await;
    assert_eq!(last.items.len(), 5);
    assert!(!last.has_next);
    assert!(last.has_prev);
    assert_eq!(last.items[0].scientific_name, "Species 040");
}

#[tokio::test]
async fn test_limit_is_clamped() {
    let (_dir, catalogue) = catalogue_with(120, |_| "white").await;

    let page = catalogue
        .query(&CatalogueQuery {
            limit: 150,
            ..Default::default()
        })
        .await;
    assert_eq!(page.limit, 100);
    assert_eq!(page.items.len(), 100);
    assert_eq!(page.pages, 2);

    let page = catalogue
        .query(&CatalogueQuery {
            limit: 0,
            page: -4,
            ..Default::default()
        })
        .await;
    assert_eq!(page.limit, 1);
    assert_eq!(page.page, 1);
}

#[tokio::test]
async fn test_single_color_filters_in_store() {
    let (_dir, catalogue) = catalogue_with(20, |i| if i < 4 { "red" } else { "blue" }).await;

    let page = catalogue
        .query(&CatalogueQuery {
            colors: CatalogueQuery::parse_colors("red"),
            ..Default::default()
        })
        .await;
    assert_eq!(page.total, 4);
    assert_eq!(page.items.len(), 4);
    assert!(!page.post_filtered);
}

/// Several colors are filtered after paging: `total` keeps counting every
/// species the store matched.
#[tokio::test]
async fn test_multi_color_total_is_unfiltered() {
    let (_dir, catalogue) = catalogue_with(20, |i| match i {
        0 => "red",
        1 => "pink",
        _ => "blue",
    })
    .await;

    let page = catalogue
        .query(&CatalogueQuery {
            colors: CatalogueQuery::parse_colors("red,pink"),
            ..Default::default()
        })
        .await;

    assert!(page.post_filtered);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total, 20);
    assert!(page.items.iter().all(|s| s.traits.has_any_color(&["red", "pink"])));
}

/// Filter values offered by `available_filters` select their species even
/// when the stored color is capitalized.
#[tokio::test]
async fn test_mixed_case_colors_match_offered_filters() {
    let (_dir, catalogue) = catalogue_with(5, |i| match i {
        0 => "Red",
        1 => "Pink",
        _ => "white",
    })
    .await;

    let filters = catalogue.available_filters().await;
    let offered: Vec<&str> = filters.colors.iter().map(|o| o.value.as_str()).collect();
    assert_eq!(offered, vec!["Pink", "Red", "white"]);

    let page = catalogue
        .query(&CatalogueQuery {
            colors: CatalogueQuery::parse_colors("Red"),
            ..Default::default()
        })
        .await;
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].scientific_name, "Species 000");

    let page = catalogue
        .query(&CatalogueQuery {
            colors: CatalogueQuery::parse_colors("Red,Pink"),
            ..Default::default()
        })
        .await;
    let names: Vec<&str> = page.items.iter().map(|s| s.scientific_name.as_str()).collect();
    assert_eq!(names, vec!["Species 000", "Species 001"]);
    assert_eq!(page.total, 5);

    // Case is significant
    let page = catalogue
        .query(&CatalogueQuery {
            colors: CatalogueQuery::parse_colors("red"),
            ..Default::default()
        })
        .await;
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn test_region_filter_and_popularity_sort() {
    let (_dir, catalogue) = catalogue_with(9, |_| "white").await;

    let page = catalogue
        .query(&CatalogueQuery {
            region: Some("JP".to_string()),
            sort: SortBy::Popularity,
            ..Default::default()
        })
        .await;

    let names: Vec<&str> = page.items.iter().map(|s| s.scientific_name.as_str()).collect();
    assert_eq!(names, vec!["Species 006", "Species 003", "Species 000"]);
    assert_eq!(page.total, 3);
}

#[tokio::test]
async fn test_available_filters() {
    let (_dir, catalogue) = catalogue_with(6, |i| if i % 2 == 0 { "yellow" } else { "purple" }).await;

    let filters = catalogue.available_filters().await;

    let colors: Vec<(&str, &str, i64)> = filters
        .colors
        .iter()
        .map(|o| (o.value.as_str(), o.label.as_str(), o.count))
        .collect();
    assert_eq!(colors, vec![("purple", "Purple", 3), ("yellow", "Yellow", 3)]);

    let countries: Vec<(&str, i64)> = filters
        .countries
        .iter()
        .map(|o| (o.value.as_str(), o.count))
        .collect();
    assert_eq!(countries, vec![("JP", 2), ("US", 4)]);

    assert_eq!(filters.sort_options.len(), 3);
}

#[tokio::test]
async fn test_empty_catalogue() {
    let (_dir, catalogue) = catalogue_with(0, |_| "white").await;

    let page = catalogue.query(&CatalogueQuery::default()).await;
    assert_eq!(page.total, 0);
    assert_eq!(page.pages, 0);
    assert!(page.items.is_empty());
    assert!(!page.has_next);

    let filters = catalogue.available_filters().await;
    assert!(filters.colors.is_empty());
    assert!(filters.countries.is_empty());
}
