//! Core types for Health Bridge
//!
//! This module defines the platform-neutral vocabulary that applications use to talk to the
//! bridge: data types, queries, samples, aggregation buckets and write requests. Every value
//! here is request-scoped; nothing is persisted.

use crate::error::HealthError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Neutral data types understood by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataType {
    #[serde(rename = "steps")]
    Steps,
    #[serde(rename = "distance")]
    Distance,
    #[serde(rename = "distance.cycling")]
    DistanceCycling,
    #[serde(rename = "calories")]
    Calories,
    #[serde(rename = "calories.active")]
    CaloriesActive,
    #[serde(rename = "calories.basal")]
    CaloriesBasal,
    #[serde(rename = "height")]
    Height,
    #[serde(rename = "weight")]
    Weight,
    #[serde(rename = "heart_rate")]
    HeartRate,
    #[serde(rename = "fat_percentage")]
    FatPercentage,
    #[serde(rename = "activity")]
    Activity,
    #[serde(rename = "gender")]
    Gender,
    #[serde(rename = "date_of_birth")]
    DateOfBirth,
}

impl DataType {
    pub const ALL: [DataType; 13] = [
        DataType::Steps,
        DataType::Distance,
        DataType::DistanceCycling,
        DataType::Calories,
        DataType::CaloriesActive,
        DataType::CaloriesBasal,
        DataType::Height,
        DataType::Weight,
        DataType::HeartRate,
        DataType::FatPercentage,
        DataType::Activity,
        DataType::Gender,
        DataType::DateOfBirth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Steps => "steps",
            DataType::Distance => "distance",
            DataType::DistanceCycling => "distance.cycling",
            DataType::Calories => "calories",
            DataType::CaloriesActive => "calories.active",
            DataType::CaloriesBasal => "calories.basal",
            DataType::Height => "height",
            DataType::Weight => "weight",
            DataType::HeartRate => "heart_rate",
            DataType::FatPercentage => "fat_percentage",
            DataType::Activity => "activity",
            DataType::Gender => "gender",
            DataType::DateOfBirth => "date_of_birth",
        }
    }

    /// Types that can be read but never written back to the native store
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            DataType::Gender
                | DataType::DateOfBirth
                | DataType::CaloriesBasal
                | DataType::CaloriesActive
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = HealthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .iter()
            .copied()
            .find(|dt| dt.as_str() == s)
            .ok_or_else(|| HealthError::UnknownDataType(s.to_string()))
    }
}

/// Native health store family behind the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "healthkit")]
    HealthKit,
    #[serde(rename = "google_fit")]
    GoogleFit,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::HealthKit => "healthkit",
            Platform::GoogleFit => "google_fit",
        }
    }
}

impl FromStr for Platform {
    type Err = HealthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "healthkit" | "ios" => Ok(Platform::HealthKit),
            "google_fit" | "googlefit" | "android" => Ok(Platform::GoogleFit),
            other => Err(HealthError::Config(format!("unknown platform {other}"))),
        }
    }
}

/// Calendar-aligned bucket size for aggregated queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketSize {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl BucketSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketSize::Hour => "hour",
            BucketSize::Day => "day",
            BucketSize::Week => "week",
            BucketSize::Month => "month",
            BucketSize::Year => "year",
        }
    }
}

impl FromStr for BucketSize {
    type Err = HealthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hour" => Ok(BucketSize::Hour),
            "day" => Ok(BucketSize::Day),
            "week" => Ok(BucketSize::Week),
            "month" => Ok(BucketSize::Month),
            "year" => Ok(BucketSize::Year),
            _ => Err(HealthError::InvalidArgument(format!(
                "bucket type {s} not recognised"
            ))),
        }
    }
}

/// What to do with a sample whose interval crosses a bucket boundary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StraddlePolicy {
    /// Fold the sample into no bucket (the historical behaviour)
    #[default]
    Drop,
    /// Fold the whole sample into the bucket holding its start instant
    StartBucket,
    /// Fold a share of the sample into every overlapping bucket, proportional to overlap
    Split,
}

impl FromStr for StraddlePolicy {
    type Err = HealthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop" => Ok(StraddlePolicy::Drop),
            "start_bucket" | "start" => Ok(StraddlePolicy::StartBucket),
            "split" => Ok(StraddlePolicy::Split),
            other => Err(HealthError::Config(format!("unknown straddle policy {other}"))),
        }
    }
}

/// Drop sub-second precision. Always moves towards the earlier instant.
pub fn truncate_to_second(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant - Duration::nanoseconds(i64::from(instant.timestamp_subsec_nanos()))
}

/// A closed interval of whole-second instants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, HealthError> {
        let start = truncate_to_second(start);
        let end = truncate_to_second(end);
        if start > end {
            return Err(HealthError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Whether `[start, end]` lies completely inside this range
    pub fn encloses(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start >= self.start && end <= self.end
    }
}

/// Date of birth as returned by characteristic lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BirthDate {
    pub day: u32,
    pub month: u32,
    pub year: i32,
}

/// Per-activity accumulator inside an aggregation bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityTotals {
    /// Total time spent in the activity (milliseconds)
    pub duration: i64,
    /// Distance covered (meters)
    pub distance: f64,
    /// Energy expended (kcal)
    pub calories: f64,
}

impl ActivityTotals {
    pub fn add(&mut self, other: &ActivityTotals) {
        self.duration += other.duration;
        self.distance += other.distance;
        self.calories += other.calories;
    }
}

/// Value carried by a sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Quantity(f64),
    Text(String),
    DateOfBirth(BirthDate),
    ActivitySummary(BTreeMap<String, ActivityTotals>),
}

impl SampleValue {
    /// Numeric view of the value. Numeric strings are accepted for writes.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SampleValue::Quantity(v) => Some(*v),
            SampleValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_label(&self) -> Option<&str> {
        match self {
            SampleValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// One normalized observation or interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub value: SampleValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Workout energy total, only set on activity samples
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    /// Workout distance total, only set on activity samples
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

impl Sample {
    pub fn quantity(start: DateTime<Utc>, end: DateTime<Utc>, value: f64) -> Self {
        Self {
            start_date: start,
            end_date: end,
            value: SampleValue::Quantity(value),
            unit: None,
            source: None,
            calories: None,
            distance: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn duration(&self) -> Duration {
        self.end_date - self.start_date
    }
}

/// A neutral read request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub data_type: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<BucketSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Query {
    pub fn new(data_type: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            data_type: data_type.into(),
            start_date: start,
            end_date: end,
            bucket: None,
            unit: None,
        }
    }

    pub fn bucketed(mut self, bucket: BucketSize) -> Self {
        self.bucket = Some(bucket);
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Validated, second-truncated copy of the requested range
    pub fn range(&self) -> Result<TimeRange, HealthError> {
        TimeRange::new(self.start_date, self.end_date)
    }
}

/// A neutral write request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRequest {
    pub data_type: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub value: SampleValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

impl StoreRequest {
    pub fn new(
        data_type: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        value: SampleValue,
    ) -> Self {
        Self {
            data_type: data_type.into(),
            start_date: start,
            end_date: end,
            value,
            unit: None,
            source_name: None,
            calories: None,
            distance: None,
        }
    }
}

/// Result of an aggregated query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Aggregated {
    /// Single total spanning the whole requested range
    Total(Sample),
    /// One entry per calendar bucket, in chronological order
    Buckets(Vec<Sample>),
}
