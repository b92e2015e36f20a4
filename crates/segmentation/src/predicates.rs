//! Structured range/membership conditions and their evaluation over a dataset.

use std::collections::BTreeMap;

use audience_core::{
    AudienceError, AudienceResult, Column, ColumnType, Condition, Dataset, Mask, PhysicalType,
    Scalar,
};

/// Column name → condition. Conditions on different columns are conjoined.
pub type Conditions = BTreeMap<String, Condition>;

/// Evaluate a predicate segment into a row mask.
///
/// Rows with a null cell in a constrained column never match a range, and only
/// match a membership set that explicitly lists `null`.
pub fn evaluate(dataset: &Dataset, conditions: &Conditions) -> AudienceResult<Mask> {
    let mut mask = Mask::all(dataset.row_count());
    for (name, condition) in conditions {
        let column = resolve(dataset, name, condition)?;
        mask.retain(|row| matches(condition, &column.values[row]));
    }
    Ok(mask)
}

/// Check every condition against the dataset schema without evaluating.
pub fn validate(dataset: &Dataset, conditions: &Conditions) -> AudienceResult<()> {
    for (name, condition) in conditions {
        resolve(dataset, name, condition)?;
    }
    Ok(())
}

/// Whether a single cell satisfies a condition.
pub fn matches(condition: &Condition, value: &Scalar) -> bool {
    match condition {
        Condition::Range { min, max } => match value.as_f64() {
            Some(v) => min.is_none_or(|lo| v >= lo) && max.is_none_or(|hi| v <= hi),
            None => false,
        },
        Condition::Membership { values } => {
            values.iter().any(|allowed| allowed.loose_eq(value))
        }
    }
}

fn resolve<'a>(
    dataset: &'a Dataset,
    name: &str,
    condition: &Condition,
) -> AudienceResult<&'a Column> {
    let column = dataset
        .column(name)
        .ok_or_else(|| AudienceError::UnknownColumn(name.to_string()))?;

    match condition {
        Condition::Range { .. } if column.kind() != ColumnType::Numeric => {
            Err(AudienceError::TypeMismatch {
                column: name.to_string(),
                detail: "range condition on a categorical column".to_string(),
            })
        }
        Condition::Membership { values } => {
            match values.iter().find(|v| !membership_compatible(column.physical, v)) {
                Some(bad) => Err(AudienceError::TypeMismatch {
                    column: name.to_string(),
                    detail: format!(
                        "{} value '{}' in a set for a {:?} column",
                        bad.type_name(),
                        bad,
                        column.physical
                    ),
                }),
                None => Ok(column),
            }
        }
        _ => Ok(column),
    }
}

fn membership_compatible(physical: PhysicalType, value: &Scalar) -> bool {
    match physical {
        PhysicalType::Integer | PhysicalType::Float => value.is_numeric() || value.is_null(),
        PhysicalType::Boolean => matches!(value, Scalar::Bool(_) | Scalar::Null),
        PhysicalType::String => matches!(value, Scalar::Str(_) | Scalar::Null),
    }
}
