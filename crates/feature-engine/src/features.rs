//! Feature Vector Assembly

use crate::error::FeatureError;
use crate::record::{CompleteBaseRecord, DerivedRecord};
use crate::schema::FeatureSchema;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use tracing::debug;

/// Ordered model input, aligned with the schema the model was trained on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    /// Feature names in model order
    pub names: Vec<String>,
    /// Feature values in model order
    pub values: Vec<f64>,
    /// Timestamp when the vector was assembled
    pub timestamp_ms: u64,
}

impl FeatureVector {
    /// Number of features
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of a named feature
    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }

    /// Name/value pairs in model order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    /// View that serializes as `{name: value, ...}` in model order
    pub fn keyed(&self) -> KeyedFeatures<'_> {
        KeyedFeatures(self)
    }
}

/// Field-keyed JSON form of a [`FeatureVector`]
pub struct KeyedFeatures<'a>(&'a FeatureVector);

impl Serialize for KeyedFeatures<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in self.0.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

/// Merge base and derived values in the schema's declared order.
///
/// A schema field missing from both records, or carrying a non-finite value,
/// means an earlier stage did not populate the schema.
pub fn assemble(
    base: &CompleteBaseRecord,
    derived: &DerivedRecord,
    schema: &FeatureSchema,
) -> Result<FeatureVector, FeatureError> {
    let mut names = Vec::with_capacity(schema.len());
    let mut values = Vec::with_capacity(schema.len());

    for field in schema.fields() {
        let value = base
            .get(&field.name)
            .or_else(|| derived.get(&field.name))
            .ok_or_else(|| FeatureError::assembly(&field.name, "not produced by imputation or derivation"))?;

        if !value.is_finite() {
            return Err(FeatureError::assembly(&field.name, format!("non-finite value {}", value)));
        }

        names.push(field.name.clone());
        values.push(value);
    }

    let timestamp_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    debug!("Assembled feature vector with {} features", values.len());

    Ok(FeatureVector {
        names,
        values,
        timestamp_ms,
    })
}
