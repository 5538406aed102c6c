//! Schema introspection
//!
//! Fetches the live table/column layout of a dataset so the translator can
//! ground its prompt. Results are cached per dataset for a short TTL.

use crate::clock::Clock;
use crate::error::{GatewayError, Result};
use crate::warehouse::Warehouse;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

lazy_static! {
    static ref DATASET_NAME: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid dataset name pattern");
}

/// Dataset names are spliced into backtick-quoted table paths, so only bare
/// identifiers are accepted.
pub fn is_dataset_name(name: &str) -> bool {
    DATASET_NAME.is_match(name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// Table name -> columns (in ordinal order) for one dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub dataset: String,
    pub tables: BTreeMap<String, Vec<ColumnInfo>>,
}

impl SchemaDescriptor {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            tables: BTreeMap::new(),
        }
    }

    pub fn add_column(
        &mut self,
        table: impl Into<String>,
        column: impl Into<String>,
        data_type: impl Into<String>,
    ) {
        self.tables.entry(table.into()).or_default().push(ColumnInfo {
            name: column.into(),
            data_type: data_type.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Flattened rendering used inside the translation prompt:
    /// `table: col (TYPE), col (TYPE)` one table per line.
    pub fn render(&self) -> String {
        self.tables
            .iter()
            .map(|(table, columns)| {
                let cols: Vec<String> = columns
                    .iter()
                    .map(|c| format!("{} ({})", c.name, c.data_type))
                    .collect();
                format!("- {}: {}", table, cols.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

struct CachedSchema {
    fetched_at: DateTime<Utc>,
    schema: SchemaDescriptor,
}

/// Short-TTL schema cache keyed by dataset.
pub struct SchemaCache {
    entries: DashMap<String, CachedSchema>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SchemaCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    pub fn enabled(&self) -> bool {
        self.ttl > Duration::zero()
    }

    pub fn get(&self, dataset: &str) -> Option<SchemaDescriptor> {
        if !self.enabled() {
            return None;
        }
        let now = self.clock.now();
        let fresh = self
            .entries
            .get(dataset)
            .filter(|entry| now - entry.fetched_at <= self.ttl)
            .map(|entry| entry.schema.clone());
        if fresh.is_none() {
            self.entries.remove(dataset);
        }
        fresh
    }

    pub fn put(&self, schema: SchemaDescriptor) {
        if !self.enabled() {
            return;
        }
        self.entries.insert(
            schema.dataset.clone(),
            CachedSchema {
                fetched_at: self.clock.now(),
                schema,
            },
        );
    }
}

/// Thin adapter over the warehouse metadata call.
pub struct SchemaIntrospector {
    warehouse: Arc<dyn Warehouse>,
    cache: SchemaCache,
}

impl SchemaIntrospector {
    pub fn new(warehouse: Arc<dyn Warehouse>, cache: SchemaCache) -> Self {
        Self { warehouse, cache }
    }

    /// Describe `dataset`. Any failure, including an empty schema, is a
    /// configuration error and aborts the request.
    pub async fn describe(&self, dataset: &str) -> Result<SchemaDescriptor> {
        if let Some(schema) = self.cache.get(dataset) {
            debug!("Schema cache hit for dataset {}", dataset);
            return Ok(schema);
        }

        let schema = self.warehouse.describe_schema(dataset).await.map_err(|e| {
            warn!("Schema fetch failed for dataset {}: {}", dataset, e);
            GatewayError::Configuration(format!(
                "Could not load schema for dataset '{}': {}",
                dataset, e
            ))
        })?;

        if schema.is_empty() {
            return Err(GatewayError::Configuration(format!(
                "Dataset '{}' has no tables",
                dataset
            )));
        }

        info!("Loaded schema for dataset {} ({} tables)", dataset, schema.tables.len());
        self.cache.put(schema.clone());
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn sample() -> SchemaDescriptor {
        let mut schema = SchemaDescriptor::new("business_data");
        schema.add_column("projects", "project_id", "STRING");
        schema.add_column("projects", "budget", "NUMERIC");
        schema.add_column("clients", "client_name", "STRING");
        schema
    }

    #[test]
    fn test_render_lists_every_table() {
        let text = sample().render();
        assert_eq!(
            text,
            "- clients: client_name (STRING)\n- projects: project_id (STRING), budget (NUMERIC)"
        );
    }

    #[test]
    fn test_cache_expires_after_ttl() {
        let clock = Arc::new(ManualClock::default());
        let cache = SchemaCache::new(Duration::seconds(60), clock.clone());
        cache.put(sample());

        clock.advance(Duration::seconds(60));
        assert!(cache.get("business_data").is_some());

        clock.advance(Duration::seconds(1));
        assert!(cache.get("business_data").is_none());
    }

    #[test]
    fn test_dataset_names_are_bare_identifiers() {
        assert!(is_dataset_name("business_data"));
        assert!(is_dataset_name("_staging2"));
        for name in ["", "2024", "a.b", "a-b", "x`; DROP TABLE `p.d.t`; --", "a b"] {
            assert!(!is_dataset_name(name), "{}", name);
        }
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let clock = Arc::new(ManualClock::default());
        let cache = SchemaCache::new(Duration::zero(), clock);
        cache.put(sample());
        assert!(cache.get("business_data").is_none());
    }
}
