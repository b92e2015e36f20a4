use std::cmp::Ordering;

use audience_core::{AudienceError, AudienceResult, Dataset, Mask, PhysicalType, Row, Scalar};
use thiserror::Error;
use tracing::{debug, warn};

use super::ast::{CompareOp, Expr};
use super::parser::parse;

/// A failure confined to one row. The row is excluded and evaluation continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowError {
    #[error("column '{0}' is missing from the row")]
    MissingColumn(String),

    #[error("cannot order {left} {op} {right}")]
    Incomparable {
        op: CompareOp,
        left: &'static str,
        right: &'static str,
    },

    #[error("'{op}' expects a boolean, found {found}")]
    NotBoolean { op: &'static str, found: &'static str },

    #[error("{found} value tested against a list of {expected} values")]
    ListType {
        found: &'static str,
        expected: &'static str,
    },
}

/// Result of evaluating an expression over every row.
#[derive(Debug, Clone)]
pub struct ExpressionMask {
    pub mask: Mask,
    pub row_errors: usize,
    /// Row index and cause of the first failing row, if any.
    pub first_error: Option<(usize, RowError)>,
}

/// Parse, check and evaluate `source` against every row of the dataset.
pub fn evaluate(dataset: &Dataset, source: &str) -> AudienceResult<ExpressionMask> {
    let expr = parse(source)?;
    check(&expr, dataset)?;

    let mut mask = Mask::none(dataset.row_count());
    let mut row_errors = 0;
    let mut first_error = None;

    for index in 0..dataset.row_count() {
        match eval_row(&expr, &dataset.row(index)) {
            Ok(Scalar::Bool(true)) => mask.set(index, true),
            Ok(_) => {}
            Err(err) => {
                row_errors += 1;
                if first_error.is_none() {
                    first_error = Some((index, err));
                }
            }
        }
    }

    if let Some((row, err)) = &first_error {
        warn!(
            expression = %source,
            row_errors,
            first_row = row,
            error = %err,
            "expression failed on some rows; they were excluded"
        );
    } else {
        debug!(expression = %source, matched = mask.count(), "expression evaluated");
    }

    Ok(ExpressionMask {
        mask,
        row_errors,
        first_error,
    })
}

/// Structural check against the dataset schema: every referenced column must
/// exist and the expression must produce a boolean.
pub fn check(expr: &Expr, dataset: &Dataset) -> AudienceResult<()> {
    for name in expr.columns() {
        if !dataset.has_column(name) {
            return Err(AudienceError::UnknownColumn(name.to_string()));
        }
    }
    require_boolean(expr, dataset)
}

fn require_boolean(expr: &Expr, dataset: &Dataset) -> AudienceResult<()> {
    match expr {
        Expr::Compare { .. } | Expr::InList { .. } => Ok(()),
        Expr::Literal(Scalar::Bool(_)) => Ok(()),
        Expr::Column(name)
            if dataset
                .column(name)
                .is_some_and(|c| c.physical == PhysicalType::Boolean) =>
        {
            Ok(())
        }
        Expr::Not(inner) => require_boolean(inner, dataset),
        Expr::And(l, r) | Expr::Or(l, r) => {
            require_boolean(l, dataset)?;
            require_boolean(r, dataset)
        }
        Expr::Literal(value) => Err(AudienceError::ExpressionEval(format!(
            "expression yields a {} literal, not a boolean",
            value.type_name()
        ))),
        Expr::Column(name) => Err(AudienceError::ExpressionEval(format!(
            "column '{name}' is not boolean; compare it to a value"
        ))),
    }
}

/// Evaluate an expression against a single row.
pub fn eval_row(expr: &Expr, row: &Row<'_>) -> Result<Scalar, RowError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Column(name) => row
            .get(name)
            .cloned()
            .ok_or_else(|| RowError::MissingColumn(name.clone())),
        Expr::Not(inner) => {
            let value = truth(&eval_row(inner, row)?, "not")?;
            Ok(Scalar::Bool(!value))
        }
        Expr::And(l, r) => {
            if !truth(&eval_row(l, row)?, "and")? {
                return Ok(Scalar::Bool(false));
            }
            Ok(Scalar::Bool(truth(&eval_row(r, row)?, "and")?))
        }
        Expr::Or(l, r) => {
            if truth(&eval_row(l, row)?, "or")? {
                return Ok(Scalar::Bool(true));
            }
            Ok(Scalar::Bool(truth(&eval_row(r, row)?, "or")?))
        }
        Expr::Compare { op, left, right } => {
            let l = eval_row(left, row)?;
            let r = eval_row(right, row)?;
            compare(*op, &l, &r).map(Scalar::Bool)
        }
        Expr::InList {
            operand,
            values,
            negated,
        } => {
            let value = eval_row(operand, row)?;
            check_list_type(&value, values)?;
            let found = values.iter().any(|candidate| candidate.loose_eq(&value));
            Ok(Scalar::Bool(found != *negated))
        }
    }
}

/// Null behaves as false in boolean position.
fn truth(value: &Scalar, op: &'static str) -> Result<bool, RowError> {
    match value {
        Scalar::Bool(b) => Ok(*b),
        Scalar::Null => Ok(false),
        other => Err(RowError::NotBoolean {
            op,
            found: other.type_name(),
        }),
    }
}

fn compare(op: CompareOp, left: &Scalar, right: &Scalar) -> Result<bool, RowError> {
    let test: fn(Ordering) -> bool = match op {
        CompareOp::Eq => return Ok(left.loose_eq(right)),
        CompareOp::Ne => return Ok(!left.loose_eq(right)),
        CompareOp::Lt => Ordering::is_lt,
        CompareOp::Le => Ordering::is_le,
        CompareOp::Gt => Ordering::is_gt,
        CompareOp::Ge => Ordering::is_ge,
    };
    if left.is_null() || right.is_null() {
        return Ok(false);
    }
    left.partial_order(right)
        .map(test)
        .ok_or_else(|| RowError::Incomparable {
            op,
            left: left.type_name(),
            right: right.type_name(),
        })
}

/// A non-null operand must share a type family with at least one listed value.
fn check_list_type(value: &Scalar, list: &[Scalar]) -> Result<(), RowError> {
    if value.is_null() {
        return Ok(());
    }
    let mut non_null = list.iter().filter(|v| !v.is_null()).peekable();
    let Some(first) = non_null.peek().copied() else {
        return Ok(());
    };
    if non_null.any(|candidate| same_family(candidate, value)) {
        Ok(())
    } else {
        Err(RowError::ListType {
            found: value.type_name(),
            expected: first.type_name(),
        })
    }
}

fn same_family(a: &Scalar, b: &Scalar) -> bool {
    match (a, b) {
        (Scalar::Bool(_), Scalar::Bool(_)) | (Scalar::Str(_), Scalar::Str(_)) => true,
        _ => a.is_numeric() && b.is_numeric(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customers() -> Dataset {
        Dataset::from_rows(
            &[
                ("Age", PhysicalType::Integer),
                ("Balance", PhysicalType::Float),
                ("Gender", PhysicalType::String),
                ("Active", PhysicalType::Boolean),
            ],
            vec![
                vec![Scalar::Int(17), Scalar::Float(50.0), "Female".into(), true.into()],
                vec![Scalar::Int(42), Scalar::Float(9000.0), "Male".into(), false.into()],
                vec![Scalar::Int(67), Scalar::Null, "Female".into(), true.into()],
                vec![Scalar::Null, Scalar::Float(120.5), Scalar::Null, Scalar::Null],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_comparisons_and_logic() {
        let ds = customers();
        let out = evaluate(&ds, "Age >= 18 and Gender == 'Female' or Balance < 100").unwrap();
        assert_eq!(out.mask.indices(), vec![0, 2]);
        assert_eq!(out.row_errors, 0);

        let out = evaluate(&ds, "not Active").unwrap();
        assert_eq!(out.mask.indices(), vec![1, 3]);
    }

    #[test]
    fn test_membership_and_nulls() {
        let ds = customers();
        let out = evaluate(&ds, "Gender in ['Male', 'Other']").unwrap();
        assert_eq!(out.mask.indices(), vec![1]);

        let out = evaluate(&ds, "Gender not in ['Male']").unwrap();
        assert_eq!(out.mask.indices(), vec![0, 2, 3]);

        let out = evaluate(&ds, "Balance > 0").unwrap();
        assert_eq!(out.mask.indices(), vec![0, 1, 3]);

        let out = evaluate(&ds, "Gender == null").unwrap();
        assert_eq!(out.mask.indices(), vec![3]);
    }

    #[test]
    fn test_row_errors_exclude_rows_without_failing() {
        let ds = customers();
        let out = evaluate(&ds, "Gender == 'Male' or Age > 'forty'").unwrap();
        assert_eq!(out.mask.indices(), vec![1]);
        // The null Age row compares as false rather than erroring.
        assert_eq!(out.row_errors, 2);
        let (row, err) = out.first_error.unwrap();
        assert_eq!(row, 0);
        assert!(matches!(err, RowError::Incomparable { .. }));
    }

    #[test]
    fn test_short_circuit_skips_failing_branch() {
        let ds = customers();
        let out = evaluate(&ds, "Gender == 'Nobody' and Age > 'x'").unwrap();
        assert_eq!(out.mask.count(), 0);
        assert_eq!(out.row_errors, 0);
    }

    #[test]
    fn test_list_type_mismatch_is_row_error() {
        let ds = customers();
        let out = evaluate(&ds, "Age in ['old', 'young']").unwrap();
        assert_eq!(out.mask.count(), 0);
        assert_eq!(out.row_errors, 3);
    }

    #[test]
    fn test_structural_errors_fail_whole_evaluation() {
        let ds = customers();
        assert!(matches!(
            evaluate(&ds, "Income > 10"),
            Err(AudienceError::UnknownColumn(c)) if c == "Income"
        ));
        assert!(matches!(
            evaluate(&ds, "Age"),
            Err(AudienceError::ExpressionEval(_))
        ));
        assert!(matches!(
            evaluate(&ds, "Active and 5"),
            Err(AudienceError::ExpressionEval(_))
        ));
        assert!(matches!(
            evaluate(&ds, "Age >"),
            Err(AudienceError::ExpressionSyntax { .. })
        ));
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let ds = customers();
        let first = evaluate(&ds, "Balance >= 100 or Active").unwrap();
        let second = evaluate(&ds, "Balance >= 100 or Active").unwrap();
        assert_eq!(first.mask, second.mask);
    }

    #[test]
    fn test_oversized_expression_fails_instead_of_recursing() {
        let ds = customers();
        let chain = vec!["Age > 1"; 20_000].join(" and ");
        assert!(matches!(
            evaluate(&ds, &chain).unwrap_err(),
            AudienceError::ExpressionSyntax { .. }
        ));

        let long_but_allowed = vec!["Age > 1"; 500].join(" and ");
        let out = evaluate(&ds, &long_but_allowed).unwrap();
        assert_eq!(out.mask.indices(), vec![0, 1, 2]);
    }
}
