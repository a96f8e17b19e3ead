//! Feature Schema Definition

use crate::derived::DerivedFeatureSpec;
use crate::error::FeatureError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whether a field is supplied by the caller or computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Raw customer metric supplied by the caller
    Base,
    /// Computed from other fields by a formula
    Derived,
}

/// A single model input field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Column name the model was trained on
    pub name: String,
    /// Human readable label
    pub label: String,
    /// Unit or longer description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kind: FieldKind,
    /// Training-set median, used as the imputation fallback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub median: Option<f64>,
}

impl FieldDef {
    /// Create a base field
    pub fn base(name: &str, label: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            description: None,
            kind: FieldKind::Base,
            median: None,
        }
    }

    /// Create a derived field
    pub fn derived(name: &str, label: &str) -> Self {
        Self {
            kind: FieldKind::Derived,
            ..Self::base(name, label)
        }
    }

    /// Attach a median fallback
    pub fn with_median(mut self, median: f64) -> Self {
        self.median = Some(median);
        self
    }

    /// Whether callers supply this field directly
    pub fn is_base(&self) -> bool {
        self.kind == FieldKind::Base
    }
}

/// On-disk feature definition document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureDefinition {
    #[serde(default)]
    pub description: Option<String>,
    /// Fields in the exact order the model consumes them
    pub fields: Vec<FieldDef>,
    /// Derived formulas in evaluation order
    #[serde(default)]
    pub derived: Vec<DerivedFeatureSpec>,
}

impl FeatureDefinition {
    /// Parse a definition from JSON text
    pub fn from_json(text: &str) -> Result<Self, FeatureError> {
        serde_json::from_str(text)
            .map_err(|e| FeatureError::Configuration(format!("Malformed feature definition: {}", e)))
    }
}

/// Ordered, immutable description of the model's inputs
#[derive(Debug, Clone)]
pub struct FeatureSchema {
    fields: Vec<FieldDef>,
    index: HashMap<String, usize>,
    base_count: usize,
}

impl FeatureSchema {
    /// Build a schema, rejecting duplicate names and empty base sets
    pub fn new(fields: Vec<FieldDef>) -> Result<Self, FeatureError> {
        let mut index = HashMap::with_capacity(fields.len());

        for (position, field) in fields.iter().enumerate() {
            if field.name.trim().is_empty() {
                return Err(FeatureError::Configuration(format!(
                    "Field at position {} has an empty name",
                    position
                )));
            }
            if index.insert(field.name.clone(), position).is_some() {
                return Err(FeatureError::Configuration(format!(
                    "Field '{}' is declared more than once",
                    field.name
                )));
            }
            if let Some(median) = field.median {
                if !median.is_finite() {
                    return Err(FeatureError::Configuration(format!(
                        "Median for '{}' is not a finite number",
                        field.name
                    )));
                }
            }
        }

        let base_count = fields.iter().filter(|f| f.is_base()).count();
        if base_count == 0 {
            return Err(FeatureError::Configuration(
                "Feature definition declares no base inputs".to_string(),
            ));
        }

        Ok(Self {
            fields,
            index,
            base_count,
        })
    }

    /// All fields in model order
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Total field count (the feature vector length)
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Base fields in model order
    pub fn base_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.is_base())
    }

    /// Derived fields in model order
    pub fn derived_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| !f.is_base())
    }

    /// Number of base inputs
    pub fn base_count(&self) -> usize {
        self.base_count
    }

    /// Number of derived features
    pub fn derived_count(&self) -> usize {
        self.fields.len() - self.base_count
    }

    /// Definition of a named field
    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    /// Whether `name` is a base input of this schema
    pub fn is_base(&self, name: &str) -> bool {
        self.get(name).map_or(false, FieldDef::is_base)
    }

    /// Display label, falling back to the raw name
    pub fn label<'a>(&'a self, name: &'a str) -> &'a str {
        self.get(name).map_or(name, |f| f.label.as_str())
    }
}
