//! Fixture-backed bridge
//!
//! [`ReplayBridge`] answers the native method vocabulary from an in-memory JSON fixture and
//! records every call it receives. It backs the CLI and the test suites.

use super::{DateEncoding, NativeBridge};
use crate::error::HealthError;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Native records served by a [`ReplayBridge`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayFixture {
    pub available: bool,
    /// Records per native sample type identifier
    pub samples: BTreeMap<String, Vec<Value>>,
    pub workouts: Vec<Value>,
    pub gender: Option<String>,
    pub date_of_birth: Option<Value>,
    pub weight: Option<Value>,
    pub height: Option<Value>,
    /// Canned failures keyed by `method` or `method:sampleType`
    pub failures: BTreeMap<String, String>,
}

impl Default for ReplayFixture {
    fn default() -> Self {
        Self {
            available: true,
            samples: BTreeMap::new(),
            workouts: Vec::new(),
            gender: None,
            date_of_birth: None,
            weight: None,
            height: None,
            failures: BTreeMap::new(),
        }
    }
}

/// One invocation seen by the bridge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedCall {
    pub capability: String,
    pub method: String,
    pub args: Vec<Value>,
}

#[derive(Debug)]
struct ReplayState {
    fixture: ReplayFixture,
    calls: Vec<RecordedCall>,
}

#[derive(Debug)]
pub struct ReplayBridge {
    encoding: DateEncoding,
    state: Mutex<ReplayState>,
}

impl ReplayBridge {
    pub fn new(fixture: ReplayFixture, encoding: DateEncoding) -> Self {
        Self {
            encoding,
            state: Mutex::new(ReplayState {
                fixture,
                calls: Vec::new(),
            }),
        }
    }

    pub fn empty(encoding: DateEncoding) -> Self {
        Self::new(ReplayFixture::default(), encoding)
    }

    pub fn from_json(json: &str, encoding: DateEncoding) -> Result<Self, HealthError> {
        let fixture: ReplayFixture = serde_json::from_str(json)?;
        Ok(Self::new(fixture, encoding))
    }

    /// Calls received so far, oldest first
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Snapshot of the fixture, including anything saved through the bridge
    pub fn fixture(&self) -> ReplayFixture {
        self.lock().fixture.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn instant(&self, value: Option<&Value>) -> Result<DateTime<Utc>, String> {
        let value = value.ok_or("missing date")?;
        let utc = FixedOffset::east_opt(0).ok_or("bad offset")?;
        self.encoding
            .decode(value, utc)
            .map_err(|e| e.to_string())
    }

    fn query(&self, fixture: &ReplayFixture, args: &Value) -> Result<Value, String> {
        let sample_type = args["sampleType"].as_str().ok_or("missing sampleType")?;
        let start = self.instant(args.get("startDate"))?;
        let end = self.instant(args.get("endDate"))?;

        let mut matched = Vec::new();
        for record in fixture.samples.get(sample_type).into_iter().flatten() {
            let record_start = self.instant(record.get("startDate"))?;
            let record_end = self.instant(record.get("endDate"))?;
            if record_start >= start && record_end <= end {
                matched.push(record.clone());
            }
        }
        Ok(Value::Array(matched))
    }
}

#[async_trait]
impl NativeBridge for ReplayBridge {
    async fn invoke(
        &self,
        capability: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, String> {
        let mut state = self.lock();
        state.calls.push(RecordedCall {
            capability: capability.to_string(),
            method: method.to_string(),
            args: args.clone(),
        });

        let first = args.into_iter().next().unwrap_or(Value::Null);
        let keyed = first["sampleType"]
            .as_str()
            .map(|sample_type| format!("{method}:{sample_type}"));
        let failure = keyed
            .and_then(|key| state.fixture.failures.get(&key))
            .or_else(|| state.fixture.failures.get(method));
        if let Some(message) = failure {
            return Err(message.clone());
        }

        let fixture = &mut state.fixture;
        match method {
            "available" => Ok(Value::Bool(fixture.available)),
            "requestAuthorization" => Ok(Value::Null),
            "querySampleType" => self.query(fixture, &first),
            "findWorkouts" => Ok(Value::Array(fixture.workouts.clone())),
            "readGender" => fixture
                .gender
                .clone()
                .map(Value::String)
                .ok_or_else(|| "gender not set".to_string()),
            "readDateOfBirth" => fixture
                .date_of_birth
                .clone()
                .ok_or_else(|| "date of birth not set".to_string()),
            "readWeight" => Ok(fixture.weight.clone().unwrap_or(Value::Null)),
            "readHeight" => Ok(fixture.height.clone().unwrap_or(Value::Null)),
            "saveQuantitySample" => {
                let sample_type = first["sampleType"]
                    .as_str()
                    .ok_or("missing sampleType")?
                    .to_string();
                fixture.samples.entry(sample_type).or_default().push(json!({
                    "startDate": first["startDate"],
                    "endDate": first["endDate"],
                    "quantity": first["amount"],
                    "unit": first["unit"],
                    "sourceName": first["sourceName"],
                }));
                Ok(Value::Null)
            }
            "saveWorkout" => {
                fixture.workouts.push(first);
                Ok(Value::Null)
            }
            other => Err(format!("method {other} is not available")),
        }
    }
}
