use crate::core::assembler::ResultTable;
use crate::io::geojson::{Feature, FeatureCollection};
use crate::types::PipelineResult;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Persists a result table as a GeoJSON FeatureCollection
pub struct TableWriter;

impl TableWriter {
    /// Write `table` to `path`, one feature per row in row order
    pub fn write<P: AsRef<Path>>(table: &ResultTable, path: P) -> PipelineResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let collection = Self::to_collection(table);
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &collection)?;

        log::info!(
            "✅ Wrote {} rows x {} value columns to {}",
            table.len(),
            table.columns().count(),
            path.display()
        );
        Ok(())
    }

    /// Attribute columns come first in their original order, then one
    /// column per value key; undefined cells are `null`.
    pub fn to_collection(table: &ResultTable) -> FeatureCollection {
        let mut collection = FeatureCollection::new();
        collection.name = table.name().map(str::to_string);
        collection.crs = table.crs_member().cloned();

        for (_, row) in table.rows() {
            let mut properties = Map::new();
            for name in table.attribute_names() {
                let value = row.attributes.get(name).cloned().unwrap_or(Value::Null);
                properties.insert(name.clone(), value);
            }
            for column in table.columns() {
                let value = row
                    .values
                    .get(column)
                    .copied()
                    .flatten()
                    .map(Value::from)
                    .unwrap_or(Value::Null);
                properties.insert(column.to_string(), value);
            }
            collection
                .features
                .push(Feature::new(row.geometry.clone(), properties));
        }
        collection
    }
}
