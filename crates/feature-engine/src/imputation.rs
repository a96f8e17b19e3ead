//! Missing Value Imputation

use crate::error::FeatureError;
use crate::record::{CompleteBaseRecord, NamedValues, RawInputRecord};
use crate::schema::FeatureSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Fallback values (training-set medians) for base inputs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImputationTable {
    values: HashMap<String, f64>,
}

impl ImputationTable {
    /// Table from field name to fallback value
    pub fn new(values: HashMap<String, f64>) -> Self {
        Self { values }
    }

    /// Collect the medians declared on the schema's base fields
    pub fn from_schema(schema: &FeatureSchema) -> Self {
        let values = schema
            .base_fields()
            .filter_map(|f| f.median.map(|m| (f.name.clone(), m)))
            .collect();
        Self { values }
    }

    /// Load a `{field: median}` JSON document
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FeatureError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            FeatureError::Configuration(format!("Cannot read imputation table {}: {}", path.display(), e))
        })?;
        let table: Self = serde_json::from_str(&text).map_err(|e| {
            FeatureError::Configuration(format!("Malformed imputation table {}: {}", path.display(), e))
        })?;

        if let Some((field, _)) = table.values.iter().find(|(_, v)| !v.is_finite()) {
            return Err(FeatureError::Configuration(format!(
                "Imputation value for '{}' is not finite",
                field
            )));
        }

        info!("Loaded {} imputation values from {}", table.len(), path.display());
        Ok(table)
    }

    /// Fallback value for a field, if covered
    pub fn get(&self, field: &str) -> Option<f64> {
        self.values.get(field).copied()
    }

    /// Base fields of `schema` with no fallback value
    pub fn uncovered<'a>(&self, schema: &'a FeatureSchema) -> Vec<&'a str> {
        schema
            .base_fields()
            .filter(|f| !self.values.contains_key(&f.name))
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Number of covered fields
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Fill every base field of `schema`, preferring the caller's values.
///
/// Values are not range checked; only missing and non-finite inputs are
/// replaced.
pub fn impute(
    raw: &RawInputRecord,
    schema: &FeatureSchema,
    table: &ImputationTable,
) -> Result<CompleteBaseRecord, FeatureError> {
    let mut values = NamedValues::with_capacity(schema.base_count());
    let mut imputed = Vec::new();

    for field in schema.base_fields() {
        let value = match raw.get(&field.name) {
            Some(v) => v,
            None => {
                let fallback = table.get(&field.name).ok_or_else(|| FeatureError::Data {
                    field: field.name.clone(),
                })?;
                imputed.push(field.name.clone());
                fallback
            }
        };
        values.push(&field.name, value);
    }

    for key in raw.keys() {
        if !schema.is_base(key) {
            debug!("Ignoring input '{}' (not a base field)", key);
        }
    }

    debug!(
        "Imputed {}/{} base fields",
        imputed.len(),
        schema.base_count()
    );

    Ok(CompleteBaseRecord::new(values, imputed))
}
