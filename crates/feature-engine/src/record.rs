//! Request-scoped feature records

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Caller-supplied values keyed by field name.
///
/// A field is "missing" when it is absent, `null`, an empty string, or not a
/// finite number. Missing fields are candidates for imputation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawInputRecord {
    values: BTreeMap<String, Option<f64>>,
}

impl RawInputRecord {
    /// Empty record; every field is missing
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: &str, value: impl Into<Option<f64>>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set a field; `None` marks it missing
    pub fn insert(&mut self, name: &str, value: impl Into<Option<f64>>) {
        self.values.insert(name.to_string(), value.into());
    }

    /// Supplied value, if present and finite
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .get(name)
            .copied()
            .flatten()
            .filter(|v| v.is_finite())
    }

    /// Names the caller mentioned, whether or not they carry a usable value
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, f64)> for RawInputRecord {
    fn from_iter<I: IntoIterator<Item = (&'a str, f64)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

/// A JSON cell: a number, null, or a numeric string from form/CSV input
#[derive(Deserialize)]
#[serde(untagged)]
enum InputCell {
    Number(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for RawInputRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let cells = BTreeMap::<String, Option<InputCell>>::deserialize(deserializer)?;
        let mut values = BTreeMap::new();

        for (name, cell) in cells {
            let value = match cell {
                None => None,
                Some(InputCell::Number(v)) => Some(v),
                Some(InputCell::Text(text)) => {
                    let text = text.trim();
                    if text.is_empty() {
                        None
                    } else {
                        Some(text.parse::<f64>().map_err(|_| {
                            de::Error::custom(format!("field '{}': '{}' is not a number", name, text))
                        })?)
                    }
                }
            };
            values.insert(name, value);
        }

        Ok(Self { values })
    }
}

impl Serialize for RawInputRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

/// Ordered name/value pairs that serialize as a JSON object in order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedValues {
    entries: Vec<(String, f64)>,
}

impl NamedValues {
    /// Empty map sized for `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append a value after the existing ones
    pub fn push(&mut self, name: &str, value: f64) {
        self.entries.push((name.to_string(), value));
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for NamedValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Every base field of the schema with a finite value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CompleteBaseRecord {
    values: NamedValues,
    #[serde(skip)]
    imputed: Vec<String>,
}

impl CompleteBaseRecord {
    pub(crate) fn new(values: NamedValues, imputed: Vec<String>) -> Self {
        Self { values, imputed }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name)
    }

    pub fn values(&self) -> &NamedValues {
        &self.values
    }

    /// Fields that were filled from the imputation table
    pub fn imputed(&self) -> &[String] {
        &self.imputed
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One value per derived feature, in evaluation order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DerivedRecord {
    values: NamedValues,
}

impl DerivedRecord {
    pub(crate) fn new(values: NamedValues) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name)
    }

    pub fn values(&self) -> &NamedValues {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
