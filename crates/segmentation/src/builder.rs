//! Segment builder: fluent API for constructing predicate segments.

use audience_core::{
    validate_segment_name, AudienceError, AudienceResult, Condition, Creator, Scalar, Segment,
    SegmentDefinition,
};

use crate::predicates::Conditions;

pub struct SegmentBuilder {
    name: String,
    conditions: Conditions,
    created_by: Creator,
    error: Option<AudienceError>,
}

impl SegmentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            conditions: Conditions::new(),
            created_by: Creator::new("system", ""),
            error: None,
        }
    }

    /// Inclusive range on a numeric column. A later condition on the same
    /// column replaces the earlier one.
    pub fn range(self, column: impl Into<String>, min: f64, max: f64) -> Self {
        let condition = Condition::range(Some(min), Some(max));
        self.push(column, condition)
    }

    pub fn at_least(self, column: impl Into<String>, min: f64) -> Self {
        let condition = Condition::range(Some(min), None);
        self.push(column, condition)
    }

    pub fn at_most(self, column: impl Into<String>, max: f64) -> Self {
        let condition = Condition::range(None, Some(max));
        self.push(column, condition)
    }

    pub fn one_of<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Scalar>,
    {
        let condition = Condition::one_of(values.into_iter().map(Into::into).collect());
        self.push(column, condition)
    }

    pub fn created_by(mut self, name: impl Into<String>, contact: impl Into<String>) -> Self {
        self.created_by = Creator::new(name, contact);
        self
    }

    /// The first invalid condition or an invalid name fails the build.
    pub fn build(self) -> AudienceResult<Segment> {
        if let Some(err) = self.error {
            return Err(err);
        }
        validate_segment_name(&self.name)?;
        Ok(Segment::new(
            self.name,
            SegmentDefinition::Predicate {
                conditions: self.conditions,
            },
            self.created_by,
        ))
    }

    fn push(
        mut self,
        column: impl Into<String>,
        condition: Result<Condition, AudienceError>,
    ) -> Self {
        match condition {
            Ok(condition) => {
                self.conditions.insert(column.into(), condition);
            }
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
        self
    }
}
