//! Native call adapter
//!
//! The native health store is reached through a single opaque primitive, [`NativeBridge::invoke`]:
//! capability name, method name and positional JSON arguments in, a JSON result or an error
//! message out. [`NativeCallAdapter`] wraps that primitive with the typed method vocabulary the
//! composer needs. Outgoing timestamps are encoded into the platform's epoch representation and
//! incoming date fields are decoded back into whole-second UTC instants.
//!
//! Arguments are always built as fresh values from borrowed inputs, so a caller's query or
//! store request is never modified by a native call.

mod dates;
mod replay;

pub use dates::{DateEncoding, NATIVE_LOCAL_FORMAT};
pub use replay::{RecordedCall, ReplayBridge, ReplayFixture};

use crate::error::HealthError;
use crate::types::{Platform, TimeRange};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub const HEALTHKIT_CAPABILITY: &str = "HealthKit";
pub const GOOGLE_FIT_CAPABILITY: &str = "Health";

/// The opaque native remote-call primitive
#[async_trait]
pub trait NativeBridge: Send + Sync {
    async fn invoke(&self, capability: &str, method: &str, args: Vec<Value>)
        -> Result<Value, String>;
}

impl DateEncoding {
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::HealthKit => DateEncoding::EpochSeconds,
            Platform::GoogleFit => DateEncoding::EpochMillis,
        }
    }
}

/// A quantity or category record as returned by the native store
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub value: Value,
    pub unit: Option<String>,
    pub source: Option<String>,
}

/// A workout record as returned by the native store
#[derive(Debug, Clone, PartialEq)]
pub struct RawWorkout {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub activity_type: String,
    pub source: Option<String>,
    pub total_distance: Option<f64>,
    pub total_energy: Option<f64>,
}

/// Latest body measurement from a profile reader
#[derive(Debug, Clone, PartialEq)]
pub struct RawMeasurement {
    pub value: f64,
    pub unit: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSample {
    start_date: Value,
    end_date: Value,
    #[serde(default, alias = "quantity")]
    value: Value,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default, alias = "sourceName")]
    source: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireWorkout {
    start_date: Value,
    end_date: Value,
    activity_type: String,
    #[serde(default, alias = "sourceName")]
    source: Option<String>,
    #[serde(default, alias = "distance")]
    total_distance: Option<f64>,
    #[serde(default, alias = "energy", alias = "totalEnergy")]
    total_energy_burned: Option<f64>,
}

#[derive(Deserialize)]
struct WireMeasurement {
    value: f64,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default, alias = "startDate")]
    date: Option<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizationArgs<'a> {
    read_types: &'a [&'a str],
    write_types: &'a [&'a str],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SampleQueryArgs<'a> {
    sample_type: &'a str,
    start_date: i64,
    end_date: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<&'a str>,
}

#[derive(Serialize)]
struct UnitArgs<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveQuantityArgs<'a> {
    sample_type: &'a str,
    start_date: i64,
    end_date: i64,
    amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_name: Option<&'a str>,
}

/// A workout write, with native activity label already resolved
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutRecord<'a> {
    pub activity_type: &'a str,
    #[serde(skip)]
    pub start: DateTime<Utc>,
    #[serde(skip)]
    pub end: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_name: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveWorkoutArgs<'a> {
    #[serde(flatten)]
    record: &'a WorkoutRecord<'a>,
    start_date: i64,
    end_date: i64,
}

/// A quantity write against one native identifier
#[derive(Debug, Clone)]
pub struct QuantityRecord<'a> {
    pub sample_type: &'a str,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub amount: f64,
    pub unit: Option<&'a str>,
    pub source_name: Option<&'a str>,
}

/// Typed method vocabulary over a [`NativeBridge`]
#[derive(Clone)]
pub struct NativeCallAdapter {
    bridge: Arc<dyn NativeBridge>,
    capability: &'static str,
    encoding: DateEncoding,
    offset: FixedOffset,
}

impl std::fmt::Debug for NativeCallAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeCallAdapter")
            .field("capability", &self.capability)
            .field("encoding", &self.encoding)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl NativeCallAdapter {
    pub fn new(bridge: Arc<dyn NativeBridge>, platform: Platform, offset: FixedOffset) -> Self {
        let capability = match platform {
            Platform::HealthKit => HEALTHKIT_CAPABILITY,
            Platform::GoogleFit => GOOGLE_FIT_CAPABILITY,
        };
        Self {
            bridge,
            capability,
            encoding: DateEncoding::for_platform(platform),
            offset,
        }
    }

    /// Raw invocation. Native failures come back as [`HealthError::NativeError`] with the
    /// message unchanged.
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, HealthError> {
        tracing::debug!(capability = self.capability, method, "native call");
        self.bridge
            .invoke(self.capability, method, args)
            .await
            .map_err(HealthError::NativeError)
    }

    async fn invoke_with<A: Serialize + Sync>(
        &self,
        method: &str,
        args: &A,
    ) -> Result<Value, HealthError> {
        self.invoke(method, vec![serde_json::to_value(args)?]).await
    }

    pub async fn available(&self) -> Result<bool, HealthError> {
        match self.invoke("available", Vec::new()).await? {
            Value::Bool(available) => Ok(available),
            other => Err(HealthError::InvalidResponse(format!(
                "available returned {other}"
            ))),
        }
    }

    pub async fn request_authorization(
        &self,
        read_types: &[&str],
        write_types: &[&str],
    ) -> Result<(), HealthError> {
        let args = AuthorizationArgs {
            read_types,
            write_types,
        };
        self.invoke_with("requestAuthorization", &args).await?;
        Ok(())
    }

    pub async fn query_samples(
        &self,
        sample_type: &str,
        range: &TimeRange,
        unit: Option<&str>,
    ) -> Result<Vec<RawSample>, HealthError> {
        let args = SampleQueryArgs {
            sample_type,
            start_date: self.encoding.encode(range.start),
            end_date: self.encoding.encode(range.end),
            unit,
        };
        let response = self.invoke_with("querySampleType", &args).await?;
        let wire: Vec<WireSample> = decode_list(response, "querySampleType")?;
        wire.into_iter()
            .map(|w| {
                Ok(RawSample {
                    start: self.decode_date(&w.start_date)?,
                    end: self.decode_date(&w.end_date)?,
                    value: w.value,
                    unit: w.unit,
                    source: w.source,
                })
            })
            .collect()
    }

    /// Every workout on record. The native store offers no time filter for workouts.
    pub async fn find_workouts(&self) -> Result<Vec<RawWorkout>, HealthError> {
        let response = self.invoke("findWorkouts", Vec::new()).await?;
        let wire: Vec<WireWorkout> = decode_list(response, "findWorkouts")?;
        wire.into_iter()
            .map(|w| {
                Ok(RawWorkout {
                    start: self.decode_date(&w.start_date)?,
                    end: self.decode_date(&w.end_date)?,
                    activity_type: w.activity_type,
                    source: w.source,
                    total_distance: w.total_distance,
                    total_energy: w.total_energy_burned,
                })
            })
            .collect()
    }

    pub async fn read_gender(&self) -> Result<String, HealthError> {
        match self.invoke("readGender", Vec::new()).await? {
            Value::String(gender) => Ok(gender),
            other => Err(HealthError::InvalidResponse(format!(
                "readGender returned {other}"
            ))),
        }
    }

    pub async fn read_date_of_birth(&self) -> Result<DateTime<Utc>, HealthError> {
        let response = self.invoke("readDateOfBirth", Vec::new()).await?;
        self.decode_date(&response)
    }

    /// Profile reader such as `readWeight`; `None` when the store has no measurement
    pub async fn read_body_measure(
        &self,
        method: &str,
        unit: Option<&str>,
    ) -> Result<Option<RawMeasurement>, HealthError> {
        let response = self.invoke_with(method, &UnitArgs { unit }).await?;
        if response.is_null() {
            return Ok(None);
        }
        let wire: WireMeasurement = serde_json::from_value(response)
            .map_err(|e| HealthError::InvalidResponse(format!("{method}: {e}")))?;
        let date = wire.date.as_ref().map(|d| self.decode_date(d)).transpose()?;
        Ok(Some(RawMeasurement {
            value: wire.value,
            unit: wire.unit,
            date,
        }))
    }

    pub async fn save_quantity(&self, record: &QuantityRecord<'_>) -> Result<(), HealthError> {
        let args = SaveQuantityArgs {
            sample_type: record.sample_type,
            start_date: self.encoding.encode(record.start),
            end_date: self.encoding.encode(record.end),
            amount: record.amount,
            unit: record.unit,
            source_name: record.source_name,
        };
        self.invoke_with("saveQuantitySample", &args).await?;
        Ok(())
    }

    pub async fn save_workout(&self, record: &WorkoutRecord<'_>) -> Result<(), HealthError> {
        let args = SaveWorkoutArgs {
            record,
            start_date: self.encoding.encode(record.start),
            end_date: self.encoding.encode(record.end),
        };
        self.invoke_with("saveWorkout", &args).await?;
        Ok(())
    }

    fn decode_date(&self, value: &Value) -> Result<DateTime<Utc>, HealthError> {
        self.encoding.decode(value, self.offset)
    }
}

fn decode_list<T: serde::de::DeserializeOwned>(
    response: Value,
    method: &str,
) -> Result<Vec<T>, HealthError> {
    if response.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(response)
        .map_err(|e| HealthError::InvalidResponse(format!("{method}: {e}")))
}
