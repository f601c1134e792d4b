//! Species import from a JSON file
//!
//! The file holds an array of species records in the shape of
//! [`NewSpecies`]. Records are inserted one by one; a rejected record is
//! logged and counted, and the rest of the file still imports.

use calyx_common::db::NewSpecies;
use calyx_common::{Error, Result};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::store::SpeciesStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub failed: usize,
}

/// Parse a species array
pub fn parse_species(json: &str) -> Result<Vec<NewSpecies>> {
    serde_json::from_str(json).map_err(|e| Error::InvalidInput(format!("Invalid species file: {}", e)))
}

/// Import every record of `path` through `store`
pub async fn import_species_file(store: &dyn SpeciesStore, path: &Path) -> Result<ImportReport> {
    let content = tokio::fs::read_to_string(path).await?;
    let records = parse_species(&content)?;

    let mut report = ImportReport::default();
    for record in &records {
        match store.insert_species(record).await {
            Ok(id) => {
                report.inserted += 1;
                debug!(%id, species = %record.scientific_name, "Species imported");
            }
            Err(e) => {
                report.failed += 1;
                warn!(species = %record.scientific_name, error = %e, "Species rejected");
            }
        }
    }

    info!(
        path = %path.display(),
        inserted = report.inserted,
        failed = report.failed,
        "Species import finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use calyx_common::db::{FlowerSize, PetalCount};

    #[test]
    fn test_parse_species_with_growing_info() {
        let records = parse_species(
            r#"[{
                "scientific_name": "Helianthus annuus",
                "common_names": ["Sunflower"],
                "family": "Asteraceae",
                "traits": {"color_primary": "yellow", "petal_count": "many", "flower_size": "large"},
                "native_region": ["US", "MX"],
                "light_requirement": "full sun"
            }]"#,
        )
        .unwrap();

        assert_eq!(records.len(), 1);
        let sunflower = &records[0];
        assert_eq!(sunflower.traits.color_primary, vec!["yellow".to_string()]);
        assert_eq!(sunflower.traits.petal_count, Some(PetalCount::Category("many".to_string())));
        assert_eq!(sunflower.traits.flower_size, Some(FlowerSize::Large));
        assert_eq!(sunflower.growing_info.native_region, vec!["US", "MX"]);
        assert_eq!(sunflower.growing_info.light_requirement.as_deref(), Some("full sun"));
        assert!(sunflower.embedding.is_none());
    }

    #[test]
    fn test_parse_species_rejects_object() {
        assert!(matches!(
            parse_species(r#"{"scientific_name": "Rosa"}"#),
            Err(Error::InvalidInput(_))
        ));
    }
}
