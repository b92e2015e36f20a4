//! Immutable in-memory dataset snapshot shared by every evaluation.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AudienceError, AudienceResult};

/// A single typed cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Scalar::Int(_) | Scalar::Float(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Bool(_) => "boolean",
            Scalar::Int(_) => "integer",
            Scalar::Float(_) => "float",
            Scalar::Str(_) => "string",
        }
    }

    /// Equality with integer/float unification. Values of unrelated types are
    /// never equal.
    pub fn loose_eq(&self, other: &Scalar) -> bool {
        match (self, other) {
            (Scalar::Null, Scalar::Null) => true,
            (Scalar::Bool(a), Scalar::Bool(b)) => a == b,
            (Scalar::Str(a), Scalar::Str(b)) => a == b,
            (a, b) if a.is_numeric() && b.is_numeric() => a.as_f64() == b.as_f64(),
            _ => false,
        }
    }

    /// Ordering between two values of comparable types. `None` when the types
    /// cannot be ordered against each other.
    pub fn partial_order(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Int(a), Scalar::Int(b)) => Some(a.cmp(b)),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                a.as_f64()?.partial_cmp(&b.as_f64()?)
            }
            (Scalar::Str(a), Scalar::Str(b)) => Some(a.cmp(b)),
            (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scalar::Null => serde_json::Value::Null,
            Scalar::Bool(b) => serde_json::Value::Bool(*b),
            Scalar::Int(i) => serde_json::Value::from(*i),
            Scalar::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Scalar::Str(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Str(v)
    }
}

/// Semantic column type used by the segment editor and the evaluators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Numeric,
    Categorical,
}

/// Storage type of a column's cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhysicalType {
    Integer,
    Float,
    Boolean,
    String,
}

impl PhysicalType {
    pub fn semantic(&self) -> ColumnType {
        match self {
            PhysicalType::Integer | PhysicalType::Float => ColumnType::Numeric,
            PhysicalType::Boolean | PhysicalType::String => ColumnType::Categorical,
        }
    }

    /// Whether a cell value may be stored in a column of this type.
    pub fn accepts(&self, value: &Scalar) -> bool {
        match (self, value) {
            (_, Scalar::Null) => true,
            (PhysicalType::Integer, Scalar::Int(_)) => true,
            (PhysicalType::Float, v) => v.is_numeric(),
            (PhysicalType::Boolean, Scalar::Bool(_)) => true,
            (PhysicalType::String, Scalar::Str(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub physical: PhysicalType,
    pub values: Vec<Scalar>,
}

impl Column {
    pub fn new(name: impl Into<String>, physical: PhysicalType, values: Vec<Scalar>) -> Self {
        Self {
            name: name.into(),
            physical,
            values,
        }
    }

    pub fn kind(&self) -> ColumnType {
        self.physical.semantic()
    }

    /// Distinct non-null values in ascending order.
    pub fn distinct_values(&self) -> Vec<Scalar> {
        match self.physical {
            PhysicalType::String => self
                .values
                .iter()
                .filter_map(|v| match v {
                    Scalar::Str(s) => Some(s.as_str()),
                    _ => None,
                })
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(Scalar::from)
                .collect(),
            PhysicalType::Boolean => self
                .values
                .iter()
                .filter_map(|v| match v {
                    Scalar::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(Scalar::Bool)
                .collect(),
            PhysicalType::Integer | PhysicalType::Float => {
                let mut values: Vec<Scalar> =
                    self.values.iter().filter(|v| !v.is_null()).cloned().collect();
                values.sort_by(|a, b| a.partial_order(b).unwrap_or(Ordering::Equal));
                values.dedup_by(|a, b| a.loose_eq(b));
                values
            }
        }
    }
}

/// Column-major, read-only table. Schema and row count never change after
/// construction.
#[derive(Debug, Clone)]
pub struct Dataset {
    columns: Vec<Column>,
    index: HashMap<String, usize>,
    row_count: usize,
}

impl Dataset {
    pub fn new(columns: Vec<Column>) -> AudienceResult<Self> {
        let row_count = columns.first().map(|c| c.values.len()).unwrap_or(0);
        let mut index = HashMap::with_capacity(columns.len());

        for (position, column) in columns.iter().enumerate() {
            if column.values.len() != row_count {
                return Err(AudienceError::Validation(format!(
                    "column '{}' has {} rows, expected {}",
                    column.name,
                    column.values.len(),
                    row_count
                )));
            }
            if let Some(bad) = column.values.iter().find(|v| !column.physical.accepts(v)) {
                return Err(AudienceError::TypeMismatch {
                    column: column.name.clone(),
                    detail: format!("{} value in {:?} column", bad.type_name(), column.physical),
                });
            }
            if index.insert(column.name.clone(), position).is_some() {
                return Err(AudienceError::Validation(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }

        Ok(Self {
            columns,
            index,
            row_count,
        })
    }

    /// Build a dataset from row-major data against a declared schema.
    pub fn from_rows(
        schema: &[(&str, PhysicalType)],
        rows: Vec<Vec<Scalar>>,
    ) -> AudienceResult<Self> {
        let mut columns: Vec<Column> = schema
            .iter()
            .map(|(name, physical)| Column::new(*name, *physical, Vec::with_capacity(rows.len())))
            .collect();

        for (row_number, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(AudienceError::Validation(format!(
                    "row {} has {} values, expected {}",
                    row_number,
                    row.len(),
                    columns.len()
                )));
            }
            for (column, value) in columns.iter_mut().zip(row) {
                column.values.push(value);
            }
        }

        Self::new(columns)
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.index.get(name).map(|&i| &self.columns[i])
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn row(&self, row: usize) -> Row<'_> {
        Row { dataset: self, row }
    }
}

/// Borrowed view of one dataset row, used as variable bindings.
#[derive(Clone, Copy)]
pub struct Row<'a> {
    dataset: &'a Dataset,
    row: usize,
}

impl<'a> Row<'a> {
    pub fn index(&self) -> usize {
        self.row
    }

    pub fn get(&self, column: &str) -> Option<&'a Scalar> {
        self.dataset
            .column(column)
            .and_then(|c| c.values.get(self.row))
    }
}

/// Boolean membership vector aligned 1:1 with dataset rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask(Vec<bool>);

impl Mask {
    pub fn all(len: usize) -> Self {
        Self(vec![true; len])
    }

    pub fn none(len: usize) -> Self {
        Self(vec![false; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, row: usize) -> bool {
        self.0.get(row).copied().unwrap_or(false)
    }

    pub fn set(&mut self, row: usize, value: bool) {
        if let Some(slot) = self.0.get_mut(row) {
            *slot = value;
        }
    }

    /// Clear every row for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(usize) -> bool) {
        for (row, slot) in self.0.iter_mut().enumerate() {
            if *slot && !keep(row) {
                *slot = false;
            }
        }
    }

    pub fn count(&self) -> usize {
        self.0.iter().filter(|m| **m).count()
    }

    /// Indices of selected rows in original order.
    pub fn indices(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.then_some(i))
            .collect()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }
}

impl From<Vec<bool>> for Mask {
    fn from(v: Vec<bool>) -> Self {
        Mask(v)
    }
}
