//! Derived Feature Calculation

use crate::error::FeatureError;
use crate::record::{CompleteBaseRecord, DerivedRecord, NamedValues};
use crate::schema::FeatureSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Denominators smaller than this in magnitude are treated as zero
pub const DENOMINATOR_EPSILON: f64 = 1e-9;

/// Formula over base fields and earlier derived features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Formula {
    /// `numerator / (denominator + offset)`
    Ratio {
        numerator: String,
        denominator: String,
        #[serde(default)]
        offset: f64,
    },
    /// `(current - baseline) / (baseline + offset)`
    RelativeChange {
        current: String,
        baseline: String,
        #[serde(default)]
        offset: f64,
    },
    /// `input / period`, e.g. loans per day over a 30 day window
    Rate { input: String, period: f64 },
    /// `minuend - subtrahend`
    Difference { minuend: String, subtrahend: String },
    /// Index of the first edge the input falls below (recency buckets)
    Bucket { input: String, edges: Vec<f64> },
}

impl Formula {
    /// Names this formula reads
    pub fn operands(&self) -> Vec<&str> {
        match self {
            Formula::Ratio {
                numerator,
                denominator,
                ..
            } => vec![numerator.as_str(), denominator.as_str()],
            Formula::RelativeChange {
                current, baseline, ..
            } => vec![current.as_str(), baseline.as_str()],
            Formula::Rate { input, .. } | Formula::Bucket { input, .. } => vec![input.as_str()],
            Formula::Difference {
                minuend,
                subtrahend,
            } => vec![minuend.as_str(), subtrahend.as_str()],
        }
    }

    fn check_constants(&self) -> Result<(), String> {
        match self {
            Formula::Ratio { offset, .. } | Formula::RelativeChange { offset, .. }
                if !offset.is_finite() =>
            {
                Err("offset must be finite".to_string())
            }
            Formula::Rate { period, .. } if !period.is_finite() || period.abs() < DENOMINATOR_EPSILON => {
                Err("period must be a finite, non-zero number".to_string())
            }
            Formula::Bucket { edges, .. } => {
                if edges.is_empty() {
                    return Err("bucket needs at least one edge".to_string());
                }
                if edges.iter().any(|e| !e.is_finite()) {
                    return Err("bucket edges must be finite".to_string());
                }
                if edges.windows(2).any(|w| w[0] >= w[1]) {
                    return Err("bucket edges must be strictly increasing".to_string());
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Evaluate against resolved operands; `None` means "use the sentinel"
    fn evaluate<F>(&self, resolve: F) -> Result<Option<f64>, FeatureError>
    where
        F: Fn(&str) -> Result<f64, FeatureError>,
    {
        let value = match self {
            Formula::Ratio {
                numerator,
                denominator,
                offset,
            } => divide(resolve(numerator)?, resolve(denominator)? + offset),
            Formula::RelativeChange {
                current,
                baseline,
                offset,
            } => {
                let baseline = resolve(baseline)?;
                divide(resolve(current)? - baseline, baseline + offset)
            }
            Formula::Rate { input, period } => divide(resolve(input)?, *period),
            Formula::Difference {
                minuend,
                subtrahend,
            } => Some(resolve(minuend)? - resolve(subtrahend)?),
            Formula::Bucket { input, edges } => {
                let v = resolve(input)?;
                let bucket = edges.iter().position(|&edge| v < edge).unwrap_or(edges.len());
                Some(bucket as f64)
            }
        };

        Ok(value.filter(|v| v.is_finite()))
    }
}

fn divide(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator.abs() < DENOMINATOR_EPSILON {
        None
    } else {
        Some(numerator / denominator)
    }
}

/// A named derived feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedFeatureSpec {
    pub name: String,
    pub formula: Formula,
    /// Fields that must all be strictly positive, otherwise the sentinel is used
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guard_positive: Vec<String>,
    /// Value used for zero denominators, failed guards and non-finite results
    #[serde(default)]
    pub sentinel: f64,
}

impl DerivedFeatureSpec {
    /// Spec with the default fallback of `0.0`
    pub fn new(name: &str, formula: Formula) -> Self {
        Self {
            name: name.to_string(),
            formula,
            guard_positive: Vec::new(),
            sentinel: 0.0,
        }
    }

    /// Require these fields to be positive before evaluating
    pub fn guarded(mut self, fields: &[&str]) -> Self {
        self.guard_positive = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Value used when the formula is undefined, such as a zero denominator
    pub fn with_sentinel(mut self, sentinel: f64) -> Self {
        self.sentinel = sentinel;
        self
    }

    /// `numerator / denominator`
    pub fn ratio(name: &str, numerator: &str, denominator: &str) -> Self {
        Self::new(
            name,
            Formula::Ratio {
                numerator: numerator.to_string(),
                denominator: denominator.to_string(),
                offset: 0.0,
            },
        )
    }

    /// `input / period`, e.g. a daily rate over a 30 day window
    pub fn rate(name: &str, input: &str, period: f64) -> Self {
        Self::new(
            name,
            Formula::Rate {
                input: input.to_string(),
                period,
            },
        )
    }

    fn references(&self) -> impl Iterator<Item = &str> {
        self.formula
            .operands()
            .into_iter()
            .chain(self.guard_positive.iter().map(String::as_str))
    }
}

/// Validated, ordered list of derived feature specs
#[derive(Debug, Clone)]
pub struct DerivedCalculator {
    specs: Vec<DerivedFeatureSpec>,
}

impl DerivedCalculator {
    /// Validate specs against the schema.
    ///
    /// Each spec may only reference base fields or derived features declared
    /// before it.
    pub fn new(specs: Vec<DerivedFeatureSpec>, schema: &FeatureSchema) -> Result<Self, FeatureError> {
        let mut available: HashSet<&str> = HashSet::new();

        for spec in &specs {
            if spec.name.trim().is_empty() {
                return Err(FeatureError::spec(&spec.name, "name is empty"));
            }
            if schema.is_base(&spec.name) {
                return Err(FeatureError::spec(&spec.name, "name collides with a base input"));
            }
            if available.contains(spec.name.as_str()) {
                return Err(FeatureError::spec(&spec.name, "declared more than once"));
            }
            if !spec.sentinel.is_finite() {
                return Err(FeatureError::spec(&spec.name, "sentinel must be finite"));
            }
            spec.formula
                .check_constants()
                .map_err(|reason| FeatureError::spec(&spec.name, reason))?;

            for reference in spec.references() {
                if reference == spec.name {
                    return Err(FeatureError::spec(&spec.name, "references itself"));
                }
                if !schema.is_base(reference) && !available.contains(reference) {
                    let reason = if schema.get(reference).is_some() {
                        format!("'{}' is not computed before this feature", reference)
                    } else {
                        format!("'{}' is not a known field", reference)
                    };
                    return Err(FeatureError::spec(&spec.name, reason));
                }
            }

            available.insert(spec.name.as_str());
        }

        Ok(Self { specs })
    }

    /// Derived feature names in evaluation order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Evaluate every spec in declaration order
    pub fn compute(&self, base: &CompleteBaseRecord) -> Result<DerivedRecord, FeatureError> {
        let mut values = NamedValues::with_capacity(self.specs.len());

        for spec in &self.specs {
            let resolve = |name: &str| -> Result<f64, FeatureError> {
                values
                    .get(name)
                    .or_else(|| base.get(name))
                    .ok_or_else(|| FeatureError::assembly(name, format!("needed by '{}'", spec.name)))
            };

            let mut guards_pass = true;
            for guard in &spec.guard_positive {
                if resolve(guard)? <= 0.0 {
                    guards_pass = false;
                    break;
                }
            }

            let value = if guards_pass {
                spec.formula.evaluate(resolve)?.unwrap_or(spec.sentinel)
            } else {
                spec.sentinel
            };

            debug!("Derived {} = {}", spec.name, value);
            values.push(&spec.name, value);
        }

        Ok(DerivedRecord::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imputation::{impute, ImputationTable};
    use crate::record::RawInputRecord;
    use crate::schema::FieldDef;

    fn schema() -> FeatureSchema {
        FeatureSchema::new(vec![
            FieldDef::base("total_loan_amt_30d", "Loan Amount").with_median(12.0),
            FieldDef::base("total_main_recharge_amt_30d", "Recharge Amount").with_median(3000.0),
            FieldDef::base("loan_count_30d", "Loans").with_median(2.0),
            FieldDef::base("last_rech_date_ma", "Days Since Recharge").with_median(3.0),
            FieldDef::derived("loan_to_recharge_ratio", "Loan/Recharge"),
            FieldDef::derived("loan_frequency_30d", "Loan Frequency"),
        ])
        .unwrap()
    }

    fn base(raw: RawInputRecord) -> CompleteBaseRecord {
        let schema = schema();
        impute(&raw, &schema, &ImputationTable::from_schema(&schema)).unwrap()
    }

    #[test]
    fn test_zero_denominator_yields_sentinel() {
        let calc = DerivedCalculator::new(
            vec![DerivedFeatureSpec::ratio(
                "loan_to_recharge_ratio",
                "total_loan_amt_30d",
                "total_main_recharge_amt_30d",
            )],
            &schema(),
        )
        .unwrap();

        let record = base(
            RawInputRecord::new()
                .with("total_loan_amt_30d", 50.0)
                .with("total_main_recharge_amt_30d", 0.0),
        );
        let derived = calc.compute(&record).unwrap();
        assert_eq!(derived.get("loan_to_recharge_ratio"), Some(0.0));
    }

    #[test]
    fn test_custom_sentinel_and_near_zero() {
        let calc = DerivedCalculator::new(
            vec![DerivedFeatureSpec::ratio(
                "loan_to_recharge_ratio",
                "total_loan_amt_30d",
                "total_main_recharge_amt_30d",
            )
            .with_sentinel(-1.0)],
            &schema(),
        )
        .unwrap();

        let record = base(RawInputRecord::new().with("total_main_recharge_amt_30d", 1e-12));
        let derived = calc.compute(&record).unwrap();
        assert_eq!(derived.get("loan_to_recharge_ratio"), Some(-1.0));
    }

    #[test]
    fn test_guarded_ratio_with_offset() {
        // recharge / (loan + 1), only when both amounts are positive
        let spec = DerivedFeatureSpec::new(
            "recharge_to_loan_ratio_30d",
            Formula::Ratio {
                numerator: "total_main_recharge_amt_30d".to_string(),
                denominator: "total_loan_amt_30d".to_string(),
                offset: 1.0,
            },
        )
        .guarded(&["total_main_recharge_amt_30d", "total_loan_amt_30d"]);
        let calc = DerivedCalculator::new(vec![spec], &schema()).unwrap();

        let record = base(
            RawInputRecord::new()
                .with("total_main_recharge_amt_30d", 330.0)
                .with("total_loan_amt_30d", 10.0),
        );
        let derived = calc.compute(&record).unwrap();
        assert!((derived.get("recharge_to_loan_ratio_30d").unwrap() - 30.0).abs() < 1e-12);

        let record = base(RawInputRecord::new().with("total_loan_amt_30d", 0.0));
        let derived = calc.compute(&record).unwrap();
        assert_eq!(derived.get("recharge_to_loan_ratio_30d"), Some(0.0));
    }

    #[test]
    fn test_relative_change_and_rate() {
        let calc = DerivedCalculator::new(
            vec![
                DerivedFeatureSpec::rate("loan_frequency_30d", "loan_count_30d", 30.0),
                DerivedFeatureSpec::new(
                    "loan_growth",
                    Formula::RelativeChange {
                        current: "loan_frequency_30d".to_string(),
                        baseline: "loan_count_30d".to_string(),
                        offset: 0.0,
                    },
                ),
            ],
            &schema(),
        )
        .unwrap();

        let record = base(RawInputRecord::new().with("loan_count_30d", 6.0));
        let derived = calc.compute(&record).unwrap();
        assert!((derived.get("loan_frequency_30d").unwrap() - 0.2).abs() < 1e-12);
        assert!((derived.get("loan_growth").unwrap() - (0.2 - 6.0) / 6.0).abs() < 1e-12);
        assert_eq!(calc.names().collect::<Vec<_>>(), vec!["loan_frequency_30d", "loan_growth"]);
    }

    #[test]
    fn test_bucket_encoding() {
        let calc = DerivedCalculator::new(
            vec![DerivedFeatureSpec::new(
                "recency_bucket",
                Formula::Bucket {
                    input: "last_rech_date_ma".to_string(),
                    edges: vec![1.0, 7.0, 30.0],
                },
            )],
            &schema(),
        )
        .unwrap();

        for (days, expected) in [(0.0, 0.0), (3.0, 1.0), (7.0, 2.0), (400.0, 3.0)] {
            let record = base(RawInputRecord::new().with("last_rech_date_ma", days));
            let derived = calc.compute(&record).unwrap();
            assert_eq!(derived.get("recency_bucket"), Some(expected), "days={}", days);
        }
    }

    #[test]
    fn test_forward_reference_rejected() {
        let err = DerivedCalculator::new(
            vec![
                DerivedFeatureSpec::ratio("loan_to_recharge_ratio", "loan_frequency_30d", "loan_count_30d"),
                DerivedFeatureSpec::rate("loan_frequency_30d", "loan_count_30d", 30.0),
            ],
            &schema(),
        )
        .unwrap_err();

        match err {
            FeatureError::Spec { feature, reason } => {
                assert_eq!(feature, "loan_to_recharge_ratio");
                assert!(reason.contains("not computed before"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let err = DerivedCalculator::new(
            vec![DerivedFeatureSpec::rate("x", "does_not_exist", 30.0)],
            &schema(),
        )
        .unwrap_err();
        assert!(err.is_fatal());

        let err = DerivedCalculator::new(
            vec![DerivedFeatureSpec::rate("y", "loan_count_30d", 10.0).guarded(&["ghost"])],
            &schema(),
        )
        .unwrap_err();
        assert!(matches!(err, FeatureError::Spec { .. }));
    }

    #[test]
    fn test_invalid_constants_rejected() {
        let schema = schema();
        assert!(DerivedCalculator::new(vec![DerivedFeatureSpec::rate("r", "loan_count_30d", 0.0)], &schema).is_err());
        assert!(DerivedCalculator::new(
            vec![DerivedFeatureSpec::new(
                "b",
                Formula::Bucket {
                    input: "loan_count_30d".to_string(),
                    edges: vec![5.0, 1.0],
                },
            )],
            &schema,
        )
        .is_err());
        assert!(DerivedCalculator::new(
            vec![
                DerivedFeatureSpec::rate("dup", "loan_count_30d", 30.0),
                DerivedFeatureSpec::rate("dup", "loan_count_30d", 90.0),
            ],
            &schema,
        )
        .is_err());
    }

    #[test]
    fn test_formula_from_json() {
        let spec: DerivedFeatureSpec = serde_json::from_str(
            r#"{"name": "spend_delta", "formula": {"op": "difference", "minuend": "a", "subtrahend": "b"}}"#,
        )
        .unwrap();
        assert_eq!(spec.sentinel, 0.0);
        assert!(spec.guard_positive.is_empty());
        assert_eq!(spec.formula.operands(), vec!["a", "b"]);
    }
}
