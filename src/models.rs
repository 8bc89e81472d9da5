use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High];

    pub fn parse(value: &str) -> Option<RiskLevel> {
        match value {
            "Low" => Some(RiskLevel::Low),
            "Medium" => Some(RiskLevel::Medium),
            "High" => Some(RiskLevel::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
        }
    }

    pub fn tone(self) -> Tone {
        match self {
            RiskLevel::Low => Tone::Success,
            RiskLevel::Medium => Tone::Warning,
            RiskLevel::High => Tone::Danger,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity shared by badges and toasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Success,
    Info,
    Warning,
    Danger,
}

impl Tone {
    pub fn as_str(self) -> &'static str {
        match self {
            Tone::Success => "success",
            Tone::Info => "info",
            Tone::Warning => "warning",
            Tone::Danger => "danger",
        }
    }
}

/// One observation of a student at a point in time, as served by `/api/records`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Record {
    pub student_id: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, deserialize_with = "deserialize_risk_level")]
    pub risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub risk_probability: Option<f64>,
    #[serde(default)]
    pub attendance: Option<f64>,
    #[serde(default)]
    pub assignment_score: Option<f64>,
    #[serde(default)]
    pub test_score: Option<f64>,
    #[serde(default)]
    pub sentiment_score_percent: Option<f64>,
    #[serde(default)]
    pub department: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordsEnvelope {
    pub records: Vec<Record>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}

/// Most recent record per student, rebuilt on every aggregation pass.
pub type LatestIndex = HashMap<String, Record>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RiskTally {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

impl RiskTally {
    pub fn record(&mut self, level: RiskLevel) {
        match level {
            RiskLevel::Low => self.low += 1,
            RiskLevel::Medium => self.medium += 1,
            RiskLevel::High => self.high += 1,
        }
    }

    pub fn get(&self, level: RiskLevel) -> usize {
        match level {
            RiskLevel::Low => self.low,
            RiskLevel::Medium => self.medium,
            RiskLevel::High => self.high,
        }
    }

    pub fn total(&self) -> usize {
        self.low + self.medium + self.high
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionInput {
    pub student_id: String,
    pub attendance: f64,
    pub assignment_score: f64,
    pub test_score: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PredictionResult {
    #[serde(deserialize_with = "deserialize_required_level")]
    pub risk_level: RiskLevel,
    pub risk_percentage: f64,
    #[serde(default)]
    pub risk_probability: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SentimentResult {
    pub sentiment_score_percent: f64,
    #[serde(default)]
    pub sentiment_score: Option<f64>,
    #[serde(default)]
    pub sentiment_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Redirect(String),
    Accepted,
}

/// Parses either RFC 3339 or the server's naive `YYYY-MM-DD HH:MM:SS`
/// form, which is taken as local time.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    parse_timestamp_in(value, &Local)
}

pub fn parse_timestamp_in<Tz: TimeZone>(value: &str, tz: &Tz) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .and_then(|naive| resolve_local(tz, naive))
        .map(|local| local.with_timezone(&Utc))
}

// Ambiguous times take the earlier instant. Times inside a spring-forward
// gap are moved past it by the usual one-hour jump.
fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognised timestamp {raw:?}")))
}

// Empty or unknown levels count as absent, matching how the server writes
// sentiment-only records.
fn deserialize_risk_level<'de, D>(deserializer: D) -> Result<Option<RiskLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(RiskLevel::parse))
}

fn deserialize_required_level<'de, D>(deserializer: D) -> Result<RiskLevel, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    RiskLevel::parse(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unknown risk level {raw:?}")))
}
