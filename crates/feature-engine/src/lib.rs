//! Feature Engineering Engine
//!
//! Turns raw customer inputs into the ordered feature vector the delinquency
//! model was trained on: schema registry, median imputation, derived feature
//! formulas and vector assembly.

mod derived;
mod error;
mod features;
mod imputation;
mod importance;
mod input;
mod record;
mod registry;
mod schema;

pub use derived::{DerivedCalculator, DerivedFeatureSpec, Formula, DENOMINATOR_EPSILON};
pub use error::FeatureError;
pub use features::{assemble, FeatureVector, KeyedFeatures};
pub use imputation::{impute, ImputationTable};
pub use importance::{FeatureImportance, ImportanceTable};
pub use input::parse_csv;
pub use record::{CompleteBaseRecord, DerivedRecord, NamedValues, RawInputRecord};
pub use registry::{FeatureRegistry, PreparedFeatures, TELECOM_DEFINITION};
pub use schema::{FeatureDefinition, FeatureSchema, FieldDef, FieldKind};
