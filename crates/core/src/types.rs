use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dataset::Scalar;
use crate::error::AudienceError;

// ─── Segments ───────────────────────────────────────────────────────────────

/// Who saved a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub name: String,
    #[serde(alias = "email")]
    pub contact: String,
}

impl Creator {
    pub fn new(name: impl Into<String>, contact: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contact: contact.into(),
        }
    }
}

/// A per-column restriction in a predicate segment.
///
/// Serialized in the editor's shape: `{"min": 18, "max": 35}` for ranges and
/// `{"values": ["Savings"]}` for membership sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCondition", into = "RawCondition")]
pub enum Condition {
    /// Inclusive numeric range; at least one bound is set.
    Range { min: Option<f64>, max: Option<f64> },
    /// Non-empty set of allowed values.
    Membership { values: Vec<Scalar> },
}

#[derive(Serialize, Deserialize)]
struct RawCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    values: Option<Vec<Scalar>>,
}

impl TryFrom<RawCondition> for Condition {
    type Error = String;

    fn try_from(raw: RawCondition) -> Result<Self, Self::Error> {
        match (raw.min, raw.max, raw.values) {
            (None, None, Some(values)) => Condition::one_of(values).map_err(|e| e.to_string()),
            (min, max, None) => Condition::range(min, max).map_err(|e| e.to_string()),
            (_, _, Some(_)) => Err("condition cannot mix a range with a value set".to_string()),
        }
    }
}

impl From<Condition> for RawCondition {
    fn from(condition: Condition) -> Self {
        match condition {
            Condition::Range { min, max } => RawCondition {
                min,
                max,
                values: None,
            },
            Condition::Membership { values } => RawCondition {
                min: None,
                max: None,
                values: Some(values),
            },
        }
    }
}

impl Condition {
    pub fn range(min: Option<f64>, max: Option<f64>) -> Result<Self, AudienceError> {
        match (min, max) {
            (None, None) => Err(AudienceError::Validation(
                "range condition needs a min or a max".to_string(),
            )),
            (Some(lo), Some(hi)) if lo > hi => Err(AudienceError::Validation(format!(
                "range min {lo} is greater than max {hi}"
            ))),
            _ => Ok(Condition::Range { min, max }),
        }
    }

    pub fn one_of(values: Vec<Scalar>) -> Result<Self, AudienceError> {
        if values.is_empty() {
            return Err(AudienceError::Validation(
                "membership condition needs at least one value".to_string(),
            ));
        }
        Ok(Condition::Membership { values })
    }
}

/// How a segment selects rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmentDefinition {
    Predicate {
        conditions: BTreeMap<String, Condition>,
    },
    Expression {
        expression: String,
    },
}

impl SegmentDefinition {
    pub fn variant(&self) -> &'static str {
        match self {
            SegmentDefinition::Predicate { .. } => "predicate",
            SegmentDefinition::Expression { .. } => "expression",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    #[serde(flatten)]
    pub definition: SegmentDefinition,
    pub created_at: DateTime<Utc>,
    pub created_by: Creator,
}

impl Segment {
    pub fn new(name: impl Into<String>, definition: SegmentDefinition, created_by: Creator) -> Self {
        Self {
            name: name.into(),
            definition,
            created_at: Utc::now(),
            created_by,
        }
    }
}

/// Segment names double as storage keys and artifact file-name prefixes.
pub fn validate_segment_name(name: &str) -> Result<(), AudienceError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AudienceError::Validation(
            "segment name must not be empty".to_string(),
        ));
    }
    if trimmed != name {
        return Err(AudienceError::Validation(
            "segment name must not start or end with whitespace".to_string(),
        ));
    }
    if name.len() > 128 {
        return Err(AudienceError::Validation(
            "segment name must be at most 128 characters".to_string(),
        ));
    }
    let forbidden = |c: char| {
        matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control()
    };
    if name.starts_with('.') || name.chars().any(forbidden) {
        return Err(AudienceError::Validation(format!(
            "segment name '{name}' contains characters not allowed in file names"
        )));
    }
    Ok(())
}

// ─── Schedules ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Row-delimited text.
    Csv,
    /// Structured-record text.
    Json,
    /// Columnar binary.
    Parquet,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Parquet => "parquet",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = AudienceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "parquet" => Ok(ExportFormat::Parquet),
            other => Err(AudienceError::Validation(format!(
                "unsupported export format '{other}'"
            ))),
        }
    }
}

/// Where exported rows go besides the local artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Destination {
    #[default]
    None,
    Named(String),
}

impl Destination {
    pub fn named(&self) -> Option<&str> {
        match self {
            Destination::None => None,
            Destination::Named(name) => Some(name),
        }
    }
}

impl From<String> for Destination {
    fn from(s: String) -> Self {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            Destination::None
        } else {
            Destination::Named(trimmed.to_string())
        }
    }
}

impl From<Destination> for String {
    fn from(d: Destination) -> Self {
        match d {
            Destination::None => "none".to_string(),
            Destination::Named(name) => name,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::None => f.write_str("none"),
            Destination::Named(name) => f.write_str(name),
        }
    }
}

/// Wall-clock time of day with minute precision, written as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(TimeOfDay)
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }

    pub fn as_naive(&self) -> NaiveTime {
        self.0
    }
}

impl FromStr for TimeOfDay {
    type Err = AudienceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(TimeOfDay)
            .map_err(|_| AudienceError::Validation(format!("run_time '{s}' is not HH:MM")))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = AudienceError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// When a schedule fires. The variant is fixed for the life of the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTrigger", into = "RawTrigger")]
pub enum Trigger {
    Daily { run_time: TimeOfDay },
    Interval { interval_hours: u32 },
}

impl Trigger {
    /// Exactly one of `run_time` / `interval_hours`; intervals are at least one hour.
    pub fn from_parts(
        run_time: Option<TimeOfDay>,
        interval_hours: Option<u32>,
    ) -> Result<Self, AudienceError> {
        match (run_time, interval_hours) {
            (Some(run_time), None) => Ok(Trigger::Daily { run_time }),
            (None, Some(0)) => Err(AudienceError::Validation(
                "interval_hours must be at least 1".to_string(),
            )),
            (None, Some(interval_hours)) => Ok(Trigger::Interval { interval_hours }),
            (Some(_), Some(_)) => Err(AudienceError::Validation(
                "give either run_time or interval_hours, not both".to_string(),
            )),
            (None, None) => Err(AudienceError::Validation(
                "schedule needs run_time or interval_hours".to_string(),
            )),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawTrigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run_time: Option<TimeOfDay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    interval_hours: Option<u32>,
}

impl TryFrom<RawTrigger> for Trigger {
    type Error = String;

    fn try_from(raw: RawTrigger) -> Result<Self, Self::Error> {
        Trigger::from_parts(raw.run_time, raw.interval_hours).map_err(|e| e.to_string())
    }
}

impl From<Trigger> for RawTrigger {
    fn from(trigger: Trigger) -> Self {
        match trigger {
            Trigger::Daily { run_time } => RawTrigger {
                run_time: Some(run_time),
                interval_hours: None,
            },
            Trigger::Interval { interval_hours } => RawTrigger {
                run_time: None,
                interval_hours: Some(interval_hours),
            },
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Daily { run_time } => write!(f, "daily at {run_time}"),
            Trigger::Interval { interval_hours } => write!(f, "every {interval_hours}h"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub segment_name: String,
    pub format: ExportFormat,
    #[serde(default)]
    pub destination: Destination,
    #[serde(flatten)]
    pub trigger: Trigger,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn new(
        segment_name: impl Into<String>,
        format: ExportFormat,
        destination: Destination,
        trigger: Trigger,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            segment_name: segment_name.into(),
            format,
            destination,
            trigger,
            last_run: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_wire_shapes() {
        let range: Condition = serde_json::from_str(r#"{"min": 18, "max": 35}"#).unwrap();
        assert_eq!(
            range,
            Condition::Range {
                min: Some(18.0),
                max: Some(35.0)
            }
        );

        let open: Condition = serde_json::from_str(r#"{"min": 1000.5, "max": null}"#).unwrap();
        assert_eq!(
            open,
            Condition::Range {
                min: Some(1000.5),
                max: None
            }
        );

        let set: Condition = serde_json::from_str(r#"{"values": ["Checking", "Savings"]}"#).unwrap();
        assert_eq!(
            set,
            Condition::Membership {
                values: vec!["Checking".into(), "Savings".into()]
            }
        );
        assert_eq!(
            serde_json::to_value(&set).unwrap(),
            serde_json::json!({"values": ["Checking", "Savings"]})
        );
    }

    #[test]
    fn test_condition_rejects_malformed() {
        assert!(serde_json::from_str::<Condition>(r#"{}"#).is_err());
        assert!(serde_json::from_str::<Condition>(r#"{"min": null, "max": null}"#).is_err());
        assert!(serde_json::from_str::<Condition>(r#"{"values": []}"#).is_err());
        assert!(serde_json::from_str::<Condition>(r#"{"min": 50, "max": 10}"#).is_err());
        assert!(serde_json::from_str::<Condition>(r#"{"min": 1, "values": [1]}"#).is_err());
    }

    #[test]
    fn test_segment_roundtrip_keeps_variant() {
        let mut conditions = BTreeMap::new();
        conditions.insert("Age".to_string(), Condition::range(Some(18.0), Some(35.0)).unwrap());
        let segment = Segment::new(
            "young_adults",
            SegmentDefinition::Predicate { conditions },
            Creator::new("Dana", "dana@example.com"),
        );

        let json = serde_json::to_value(&segment).unwrap();
        assert_eq!(json["kind"], "predicate");
        assert_eq!(json["conditions"]["Age"]["min"], 18.0);

        let back: Segment = serde_json::from_value(json).unwrap();
        assert_eq!(back, segment);

        let expr = Segment::new(
            "high_balance",
            SegmentDefinition::Expression {
                expression: "Balance > 10000".into(),
            },
            Creator::new("Dana", "dana@example.com"),
        );
        let json = serde_json::to_string(&expr).unwrap();
        let back: Segment = serde_json::from_str(&json).unwrap();
        assert_eq!(back.definition.variant(), "expression");
        assert_eq!(back, expr);
    }

    #[test]
    fn test_schedule_persisted_layout() {
        let daily = Schedule::new(
            "young_adults",
            ExportFormat::Csv,
            Destination::None,
            Trigger::Daily {
                run_time: "09:00".parse().unwrap(),
            },
        );
        let json = serde_json::to_value(&daily).unwrap();
        assert_eq!(json["segment_name"], "young_adults");
        assert_eq!(json["format"], "csv");
        assert_eq!(json["destination"], "none");
        assert_eq!(json["run_time"], "09:00");
        assert!(json["last_run"].is_null());
        assert!(json.get("interval_hours").is_none());

        let legacy: Schedule = serde_json::from_str(
            r#"{"segment_name": "vip", "format": "parquet", "interval_hours": 6, "last_run": null}"#,
        )
        .unwrap();
        assert_eq!(legacy.trigger, Trigger::Interval { interval_hours: 6 });
        assert_eq!(legacy.destination, Destination::None);

        let back: Schedule = serde_json::from_value(json).unwrap();
        assert_eq!(back, daily);
    }

    #[test]
    fn test_schedule_record_needs_one_valid_trigger() {
        let both = r#"{"segment_name": "vip", "format": "csv", "run_time": "09:00", "interval_hours": 6}"#;
        assert!(serde_json::from_str::<Schedule>(both).is_err());

        let zero = r#"{"segment_name": "vip", "format": "csv", "interval_hours": 0}"#;
        assert!(serde_json::from_str::<Schedule>(zero).is_err());

        let neither = r#"{"segment_name": "vip", "format": "csv"}"#;
        assert!(serde_json::from_str::<Schedule>(neither).is_err());

        let interval = r#"{"segment_name": "vip", "format": "csv", "interval_hours": 1}"#;
        let schedule: Schedule = serde_json::from_str(interval).unwrap();
        assert_eq!(schedule.trigger, Trigger::Interval { interval_hours: 1 });
    }

    #[test]
    fn test_time_of_day_parsing() {
        let t: TimeOfDay = "7:05".parse().unwrap();
        assert_eq!(t.to_string(), "07:05");
        assert!("25:00".parse::<TimeOfDay>().is_err());
        assert!("noon".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn test_segment_name_rules() {
        assert!(validate_segment_name("young adults 2024").is_ok());
        assert!(validate_segment_name("").is_err());
        assert!(validate_segment_name("../etc").is_err());
        assert!(validate_segment_name("a/b").is_err());
        assert!(validate_segment_name(" padded").is_err());
    }

    #[test]
    fn test_destination_string_form() {
        assert_eq!(Destination::from("none".to_string()), Destination::None);
        assert_eq!(Destination::from(String::new()), Destination::None);
        assert_eq!(
            Destination::from("crm".to_string()),
            Destination::Named("crm".into())
        );
        assert_eq!(String::from(Destination::None), "none");
    }
}
