//! Feature Registry
//!
//! Loaded once at startup and shared read-only across requests.

use crate::derived::DerivedCalculator;
use crate::error::FeatureError;
use crate::features::{assemble, FeatureVector};
use crate::imputation::{impute, ImputationTable};
use crate::record::{CompleteBaseRecord, DerivedRecord, RawInputRecord};
use crate::schema::{FeatureDefinition, FeatureSchema, FieldKind};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Telecom delinquency feature definition shipped with the crate
pub const TELECOM_DEFINITION: &str = include_str!("../definitions/telecom_delinquency.json");

/// Everything produced while preparing one record
#[derive(Debug, Clone)]
pub struct PreparedFeatures {
    pub base: CompleteBaseRecord,
    pub derived: DerivedRecord,
    pub vector: FeatureVector,
}

impl PreparedFeatures {
    /// Base fields that were filled from the imputation table
    pub fn imputed(&self) -> &[String] {
        self.base.imputed()
    }
}

/// Schema, imputation table and derived formulas for one trained model
#[derive(Debug, Clone)]
pub struct FeatureRegistry {
    schema: FeatureSchema,
    imputation: ImputationTable,
    calculator: DerivedCalculator,
    description: String,
}

impl FeatureRegistry {
    /// Load a definition file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FeatureError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            FeatureError::Configuration(format!("Cannot read feature definition {}: {}", path.display(), e))
        })?;
        let registry = Self::from_json(&text)?;
        info!(
            "Loaded feature definition from {}: {} base, {} derived",
            path.display(),
            registry.schema.base_count(),
            registry.schema.derived_count()
        );
        Ok(registry)
    }

    /// Registry for the bundled telecom definition
    pub fn telecom() -> Result<Self, FeatureError> {
        Self::from_json(TELECOM_DEFINITION)
    }

    /// Parse and validate a definition document
    pub fn from_json(text: &str) -> Result<Self, FeatureError> {
        Self::from_definition(FeatureDefinition::from_json(text)?)
    }

    /// Validate a definition and build the registry
    pub fn from_definition(definition: FeatureDefinition) -> Result<Self, FeatureError> {
        let schema = FeatureSchema::new(definition.fields)?;

        let declared: HashSet<&str> = schema.derived_fields().map(|f| f.name.as_str()).collect();
        let formulas: HashSet<&str> = definition.derived.iter().map(|s| s.name.as_str()).collect();

        if let Some(missing) = declared.difference(&formulas).next() {
            return Err(FeatureError::Configuration(format!(
                "Derived field '{}' has no formula",
                missing
            )));
        }
        if let Some(extra) = formulas.difference(&declared).next() {
            let reason = match schema.get(extra).map(|f| f.kind) {
                Some(FieldKind::Base) => "is a base input",
                _ => "is not declared as a field",
            };
            return Err(FeatureError::Configuration(format!(
                "Formula '{}' {}",
                extra, reason
            )));
        }

        let calculator = DerivedCalculator::new(definition.derived, &schema)?;
        let imputation = ImputationTable::from_schema(&schema);

        let uncovered = imputation.uncovered(&schema);
        if !uncovered.is_empty() {
            warn!(
                "No median for {} base field(s): {}; requests omitting them will fail",
                uncovered.len(),
                uncovered.join(", ")
            );
        }

        Ok(Self {
            schema,
            imputation,
            calculator,
            description: definition.description.unwrap_or_default(),
        })
    }

    /// Replace the medians declared in the definition
    pub fn with_imputation(mut self, imputation: ImputationTable) -> Self {
        let uncovered = imputation.uncovered(&self.schema);
        if !uncovered.is_empty() {
            warn!("Imputation table does not cover: {}", uncovered.join(", "));
        }
        self.imputation = imputation;
        self
    }

    /// Ordered schema the model was fit on
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Fallback values for missing base inputs
    pub fn imputation(&self) -> &ImputationTable {
        &self.imputation
    }

    /// Derived feature formulas
    pub fn calculator(&self) -> &DerivedCalculator {
        &self.calculator
    }

    /// Human-readable model description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Impute, derive and assemble one record
    pub fn prepare(&self, raw: &RawInputRecord) -> Result<PreparedFeatures, FeatureError> {
        let base = impute(raw, &self.schema, &self.imputation)?;
        let derived = self.calculator.compute(&base)?;
        let vector = assemble(&base, &derived, &self.schema)?;

        debug!(
            "Prepared {} features ({} imputed)",
            vector.len(),
            base.imputed().len()
        );

        Ok(PreparedFeatures {
            base,
            derived,
            vector,
        })
    }
}
