//! Wide zone-by-column result table.
//!
//! One row per zone key, one column per `(variable, session)`. Rows and
//! columns live in ordered maps, so the emitted order never depends on
//! insertion order.

use crate::types::{ColumnKey, PipelineError, PipelineResult, ZoneKey, ZoneSet, ZoneValues};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// What to do when a column is inserted a second time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Later insertion replaces the earlier one (logged)
    #[default]
    Overwrite,
    /// Second insertion fails with `DuplicateColumn`
    Reject,
}

/// One zone's row
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableRow {
    /// Carried-through attributes, including the key field
    pub attributes: Map<String, Value>,
    /// GeoJSON geometry, `None` for zones seen only in zonal results
    pub geometry: Option<Value>,
    pub values: BTreeMap<ColumnKey, Option<f64>>,
}

#[derive(Debug, Clone)]
pub struct ResultTable {
    key_field: String,
    attribute_names: Vec<String>,
    crs_member: Option<Value>,
    name: Option<String>,
    policy: DuplicatePolicy,
    columns: BTreeSet<ColumnKey>,
    rows: BTreeMap<ZoneKey, TableRow>,
}

impl ResultTable {
    /// Empty table whose rows are keyed by `key_field`
    pub fn new(key_field: impl Into<String>, policy: DuplicatePolicy) -> Self {
        let key_field = key_field.into();
        Self {
            attribute_names: vec![key_field.clone()],
            key_field,
            crs_member: None,
            name: None,
            policy,
            columns: BTreeSet::new(),
            rows: BTreeMap::new(),
        }
    }

    /// Table seeded with every zone of `zones` and its original attributes
    pub fn from_zone_set(zones: &ZoneSet, policy: DuplicatePolicy) -> Self {
        let mut table = Self::new(zones.key_field.clone(), policy);
        table.attribute_names = zones.attribute_names.clone();
        if !table.attribute_names.contains(&zones.key_field) {
            table.attribute_names.insert(0, zones.key_field.clone());
        }
        table.crs_member = zones.crs_member.clone();
        table.name = zones.name.clone();

        for record in &zones.records {
            table.rows.insert(
                record.key.clone(),
                TableRow {
                    attributes: record.attributes.clone(),
                    geometry: Some(record.geometry.clone()),
                    values: BTreeMap::new(),
                },
            );
        }
        table
    }

    /// Write one zonal result as `column`.
    ///
    /// Zones not yet in the table get a new row; zones of the table that are
    /// absent from `values` keep the column undefined.
    pub fn insert(&mut self, values: &ZoneValues, column: &ColumnKey) -> PipelineResult<()> {
        if self.columns.contains(column) {
            match self.policy {
                DuplicatePolicy::Reject => {
                    return Err(PipelineError::DuplicateColumn(column.to_string()));
                }
                DuplicatePolicy::Overwrite => {
                    log::warn!("Column {} inserted twice, keeping the later values", column);
                    for row in self.rows.values_mut() {
                        row.values.remove(column);
                    }
                }
            }
        }
        self.columns.insert(column.clone());

        for (key, value) in values {
            let key_field = &self.key_field;
            let row = self.rows.entry(key.clone()).or_insert_with(|| {
                let mut attributes = Map::new();
                attributes.insert(key_field.clone(), key.to_json());
                TableRow {
                    attributes,
                    ..TableRow::default()
                }
            });
            row.values.insert(column.clone(), *value);
        }
        Ok(())
    }

    /// Cell value; `None` when undefined or never written
    pub fn value(&self, key: &ZoneKey, column: &ColumnKey) -> Option<f64> {
        self.rows.get(key)?.values.get(column).copied().flatten()
    }

    /// Value columns in ascending `(variable, session)` order
    pub fn columns(&self) -> impl Iterator<Item = &ColumnKey> {
        self.columns.iter()
    }

    /// Rows in ascending zone-key order
    pub fn rows(&self) -> impl Iterator<Item = (&ZoneKey, &TableRow)> {
        self.rows.iter()
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    pub fn attribute_names(&self) -> &[String] {
        &self.attribute_names
    }

    pub fn crs_member(&self) -> Option<&Value> {
        self.crs_member.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
