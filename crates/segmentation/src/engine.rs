//! Segmentation engine: evaluates segment definitions against the shared
//! dataset snapshot and describes its columns for the segment editor.

use std::sync::Arc;

use audience_core::{
    AudienceResult, ColumnType, Dataset, Mask, PhysicalType, Scalar, Segment, SegmentDefinition,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{expression, predicates};

/// Size of a segment relative to the whole dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentStats {
    pub count: usize,
    pub total: usize,
    /// `100 * count / total`, rounded to two decimals; 0 for an empty dataset.
    pub percentage: f64,
}

impl SegmentStats {
    pub fn from_mask(mask: &Mask) -> Self {
        let count = mask.count();
        let total = mask.len();
        let percentage = if total == 0 {
            0.0
        } else {
            (count as f64 / total as f64 * 10_000.0).round() / 100.0
        };
        Self {
            count,
            total,
            percentage,
        }
    }
}

/// One entry of the column catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub physical: PhysicalType,
    /// Sorted distinct values; present for categorical columns only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_values: Option<Vec<Scalar>>,
}

/// Stateless over an immutable snapshot; safe to share across tasks.
#[derive(Debug, Clone)]
pub struct SegmentationEngine {
    dataset: Arc<Dataset>,
}

impl SegmentationEngine {
    pub fn new(dataset: Arc<Dataset>) -> Self {
        Self { dataset }
    }

    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    /// Membership mask for a definition. Expression rows that fail to
    /// evaluate are excluded from the mask.
    pub fn evaluate(&self, definition: &SegmentDefinition) -> AudienceResult<Mask> {
        let mask = match definition {
            SegmentDefinition::Predicate { conditions } => {
                predicates::evaluate(&self.dataset, conditions)?
            }
            SegmentDefinition::Expression { expression } => {
                expression::evaluate(&self.dataset, expression)?.mask
            }
        };
        debug!(
            variant = definition.variant(),
            matched = mask.count(),
            total = mask.len(),
            "segment definition evaluated"
        );
        Ok(mask)
    }

    pub fn evaluate_segment(&self, segment: &Segment) -> AudienceResult<Mask> {
        self.evaluate(&segment.definition)
    }

    pub fn stats(&self, definition: &SegmentDefinition) -> AudienceResult<SegmentStats> {
        self.evaluate(definition).map(|mask| SegmentStats::from_mask(&mask))
    }

    /// Schema-level check without touching any rows.
    pub fn validate(&self, definition: &SegmentDefinition) -> AudienceResult<()> {
        match definition {
            SegmentDefinition::Predicate { conditions } => {
                predicates::validate(&self.dataset, conditions)
            }
            SegmentDefinition::Expression { expression } => {
                let parsed = expression::parse(expression)?;
                expression::check(&parsed, &self.dataset)
            }
        }
    }

    pub fn columns(&self) -> Vec<ColumnInfo> {
        self.dataset
            .columns()
            .iter()
            .map(|column| {
                let column_type = column.kind();
                ColumnInfo {
                    name: column.name.clone(),
                    column_type,
                    physical: column.physical,
                    unique_values: (column_type == ColumnType::Categorical)
                        .then(|| column.distinct_values()),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audience_core::{AudienceError, Condition};

    /// 100 customers aged 0..100 with alternating account types.
    fn hundred_customers() -> Arc<Dataset> {
        let rows = (0..100)
            .map(|i| {
                vec![
                    Scalar::Int(i),
                    Scalar::Float(i as f64 * 10.0),
                    if i % 2 == 0 { "Savings" } else { "Checking" }.into(),
                ]
            })
            .collect();
        Arc::new(
            Dataset::from_rows(
                &[
                    ("Age", PhysicalType::Integer),
                    ("Balance", PhysicalType::Float),
                    ("AccountType", PhysicalType::String),
                ],
                rows,
            )
            .unwrap(),
        )
    }

    fn age_window() -> SegmentDefinition {
        // Ages 18..=57 are 40 customers.
        SegmentDefinition::Predicate {
            conditions: [(
                "Age".to_string(),
                Condition::range(Some(18.0), Some(57.0)).unwrap(),
            )]
            .into_iter()
            .collect(),
        }
    }

    #[test]
    fn test_stats_for_forty_of_hundred() {
        let engine = SegmentationEngine::new(hundred_customers());
        let stats = engine.stats(&age_window()).unwrap();
        assert_eq!(
            stats,
            SegmentStats {
                count: 40,
                total: 100,
                percentage: 40.0
            }
        );
    }

    #[test]
    fn test_stats_are_idempotent() {
        let engine = SegmentationEngine::new(hundred_customers());
        let definition = SegmentDefinition::Expression {
            expression: "AccountType == 'Savings' and Balance >= 250".to_string(),
        };
        let first = engine.stats(&definition).unwrap();
        let second = engine.stats(&definition).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.count, 37);
    }

    #[test]
    fn test_percentage_rounds_to_two_decimals() {
        let mask = Mask::from(vec![true, false, false]);
        assert_eq!(SegmentStats::from_mask(&mask).percentage, 33.33);

        let empty = SegmentStats::from_mask(&Mask::all(0));
        assert_eq!(empty.percentage, 0.0);
        assert_eq!(empty.total, 0);
    }

    #[test]
    fn test_validate_reports_schema_errors() {
        let engine = SegmentationEngine::new(hundred_customers());
        assert!(engine.validate(&age_window()).is_ok());

        let bad = SegmentDefinition::Expression {
            expression: "Income > 5".to_string(),
        };
        assert!(matches!(
            engine.validate(&bad),
            Err(AudienceError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_column_catalogue() {
        let engine = SegmentationEngine::new(hundred_customers());
        let columns = engine.columns();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].column_type, ColumnType::Numeric);
        assert!(columns[0].unique_values.is_none());
        assert_eq!(
            columns[2].unique_values,
            Some(vec!["Checking".into(), "Savings".into()])
        );

        let json = serde_json::to_value(&columns[2]).unwrap();
        assert_eq!(json["type"], "categorical");
        assert_eq!(json["unique_values"][1], "Savings");
    }
}
