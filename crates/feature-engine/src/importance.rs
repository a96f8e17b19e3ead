//! Global feature importance reference data

use crate::error::FeatureError;
use crate::schema::FeatureSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Importance of one model input, as exported from training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
    #[serde(default)]
    pub display_name: String,
}

/// Accepted layouts of the importance artifact
#[derive(Deserialize)]
#[serde(untagged)]
enum ImportanceDocument {
    List(Vec<FeatureImportance>),
    Wrapped {
        feature_importance: Vec<FeatureImportance>,
    },
    Map(HashMap<String, f64>),
}

/// Importance entries sorted by descending importance
#[derive(Debug, Clone, Default)]
pub struct ImportanceTable {
    entries: Vec<FeatureImportance>,
}

impl ImportanceTable {
    /// Keep entries for schema fields, label them, and sort descending
    pub fn new(entries: Vec<FeatureImportance>, schema: &FeatureSchema) -> Self {
        let mut kept: Vec<FeatureImportance> = entries
            .into_iter()
            .filter(|e| {
                let known = schema.get(&e.feature).is_some() && e.importance.is_finite();
                if !known {
                    warn!("Dropping importance entry for '{}'", e.feature);
                }
                known
            })
            .map(|mut e| {
                e.display_name = schema.label(&e.feature).to_string();
                e
            })
            .collect();

        kept.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        Self { entries: kept }
    }

    /// Load an importance artifact in list, wrapped or map form
    pub fn load(path: impl AsRef<Path>, schema: &FeatureSchema) -> Result<Self, FeatureError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            FeatureError::Configuration(format!("Cannot read feature importance {}: {}", path.display(), e))
        })?;
        let document: ImportanceDocument = serde_json::from_str(&text).map_err(|e| {
            FeatureError::Configuration(format!("Malformed feature importance {}: {}", path.display(), e))
        })?;

        let entries = match document {
            ImportanceDocument::List(entries) => entries,
            ImportanceDocument::Wrapped { feature_importance } => feature_importance,
            ImportanceDocument::Map(map) => map
                .into_iter()
                .map(|(feature, importance)| FeatureImportance {
                    feature,
                    importance,
                    display_name: String::new(),
                })
                .collect(),
        };

        let table = Self::new(entries, schema);
        info!("Loaded importance for {} features from {}", table.len(), path.display());
        Ok(table)
    }

    /// All entries, most important first
    pub fn entries(&self) -> &[FeatureImportance] {
        &self.entries
    }

    /// The `n` most important features
    pub fn top(&self, n: usize) -> &[FeatureImportance] {
        &self.entries[..n.min(self.entries.len())]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
