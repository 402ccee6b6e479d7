//! Query composer
//!
//! Turns neutral queries into native calls and native results back into neutral samples. The
//! strategy is picked by an exhaustive match over [`DataType`]:
//!
//! - characteristics (`gender`, `date_of_birth`) are single profile lookups and never bucketed
//! - `activity` fetches every workout, filters client-side, translates labels and, where the
//!   platform has one, unions the sleep-analysis samples
//! - composite types (`calories`, `distance` on stores with a companion identifier) query each
//!   component over the same range and sum them
//! - `calories.active` is read directly where the store records active energy, otherwise it is
//!   derived as total minus an estimated basal rate, clamped at zero
//! - everything else is a single native query
//!
//! Component calls of a composite or derived query are issued one after another. Any failure
//! aborts the whole operation.

use crate::activity::ActivityTranslator;
use crate::bucketing::{bucketize, fold_all, Bucket};
use crate::config::HealthConfig;
use crate::error::HealthError;
use crate::native::{NativeCallAdapter, QuantityRecord, RawSample, WorkoutRecord};
use crate::registry::Registry;
use crate::types::{
    Aggregated, BirthDate, DataType, Query, Sample, SampleValue, StoreRequest, StraddlePolicy,
    TimeRange,
};
use chrono::{DateTime, Datelike, Duration, FixedOffset, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

const SLEEP: &str = "sleep";
const SLEEP_AWAKE: &str = "sleep.awake";

/// Estimated background energy expenditure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasalRate {
    pub kcal_per_second: f64,
}

impl BasalRate {
    /// Basal energy spent over `duration`
    pub fn over(&self, duration: Duration) -> f64 {
        self.kcal_per_second * duration.num_seconds() as f64
    }

    /// Active share of `total` energy spent over `duration`, never negative
    pub fn active_from(&self, total: f64, duration: Duration) -> f64 {
        (total - self.over(duration)).max(0.0)
    }
}

/// Rewrite a total-calories sample as active calories
pub fn derive_active_calories(total: &Sample, basal: &BasalRate) -> Sample {
    let mut derived = total.clone();
    if let SampleValue::Quantity(kcal) = total.value {
        derived.value = SampleValue::Quantity(basal.active_from(kcal, total.duration()));
    }
    derived
}

/// Sum two bucket series into one. Buckets are paired by position and must share start times.
pub fn merge_buckets(
    data_type: DataType,
    primary: Vec<Bucket>,
    companion: Vec<Bucket>,
) -> Result<Vec<Bucket>, HealthError> {
    if primary.len() != companion.len() {
        let at = primary.len().min(companion.len());
        return Err(HealthError::BucketCompositionMismatch {
            data_type,
            expected: primary.get(at).map(|b| b.start_date),
            found: companion.get(at).map(|b| b.start_date),
        });
    }
    primary
        .into_iter()
        .zip(companion)
        .map(|(mut left, right)| {
            if left.start_date != right.start_date {
                return Err(HealthError::BucketCompositionMismatch {
                    data_type,
                    expected: Some(left.start_date),
                    found: Some(right.start_date),
                });
            }
            left.total += right.total;
            left.samples += right.samples;
            for (label, totals) in &right.activities {
                left.activities.entry(label.clone()).or_default().add(totals);
            }
            Ok(left)
        })
        .collect()
}

/// Union two sample sequences, summing samples that cover the identical interval
fn merge_samples(primary: Vec<Sample>, companion: Vec<Sample>) -> Vec<Sample> {
    let mut merged: BTreeMap<(DateTime<Utc>, DateTime<Utc>), Sample> = BTreeMap::new();
    for sample in primary.into_iter().chain(companion) {
        let key = (sample.start_date, sample.end_date);
        match merged.get_mut(&key) {
            Some(existing) => {
                if let (SampleValue::Quantity(sum), SampleValue::Quantity(v)) =
                    (&mut existing.value, &sample.value)
                {
                    *sum += v;
                }
            }
            None => {
                merged.insert(key, sample);
            }
        }
    }
    merged.into_values().collect()
}

fn numeric(value: &Value, data_type: DataType) -> Result<f64, HealthError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        HealthError::InvalidResponse(format!("non-numeric {data_type} value {value}"))
    })
}

fn sum_of(samples: &[RawSample], data_type: DataType) -> Result<f64, HealthError> {
    samples.iter().map(|s| numeric(&s.value, data_type)).sum()
}

#[derive(Debug, Clone)]
pub struct QueryComposer {
    native: NativeCallAdapter,
    registry: Arc<Registry>,
    activities: Arc<ActivityTranslator>,
    offset: FixedOffset,
    basal_lookback: Duration,
    straddle_policy: StraddlePolicy,
}

impl QueryComposer {
    pub fn new(
        native: NativeCallAdapter,
        registry: Arc<Registry>,
        activities: Arc<ActivityTranslator>,
        config: &HealthConfig,
    ) -> Result<Self, HealthError> {
        config.validate()?;
        Ok(Self {
            native,
            registry,
            activities,
            offset: config.utc_offset()?,
            basal_lookback: config.basal_lookback(),
            straddle_policy: config.straddle_policy,
        })
    }

    pub async fn is_available(&self) -> Result<bool, HealthError> {
        self.native.available().await
    }

    /// Ask the native store for access to the given neutral types.
    ///
    /// Every name is resolved before anything is sent. Derived and composite types expand to
    /// all of their native inputs; read-only types are only requested for reading.
    pub async fn request_authorization<S: AsRef<str>>(
        &self,
        data_types: &[S],
    ) -> Result<(), HealthError> {
        let parsed = data_types
            .iter()
            .map(|name| name.as_ref().parse::<DataType>())
            .collect::<Result<Vec<_>, _>>()?;

        let mut read: Vec<&'static str> = Vec::new();
        let mut write: Vec<&'static str> = Vec::new();
        for data_type in parsed {
            for id in self.read_identifiers(data_type)? {
                if !read.contains(&id) {
                    read.push(id);
                }
            }
            if !data_type.is_read_only() {
                let id = self.registry.native_id_of(data_type)?;
                if !write.contains(&id) {
                    write.push(id);
                }
            }
        }

        if read.is_empty() && write.is_empty() {
            return Ok(());
        }
        self.native.request_authorization(&read, &write).await
    }

    fn read_identifiers(&self, data_type: DataType) -> Result<Vec<&'static str>, HealthError> {
        let with_companion = |dt: DataType| -> Result<Vec<&'static str>, HealthError> {
            let mut ids = vec![self.registry.native_id_of(dt)?];
            if let Some(companion) = self.registry.companion_of(dt) {
                ids.push(self.registry.native_id_of(companion)?);
            }
            Ok(ids)
        };
        match data_type {
            DataType::CaloriesActive if self.records_active_energy() => {
                Ok(vec![self.registry.native_id_of(DataType::Calories)?])
            }
            DataType::CaloriesActive => {
                let mut ids = with_companion(DataType::Calories)?;
                ids.push(self.registry.native_id_of(DataType::CaloriesBasal)?);
                Ok(ids)
            }
            DataType::Activity => {
                let mut ids = vec![self.registry.native_id_of(DataType::Activity)?];
                ids.extend(self.registry.sleep_analysis_id());
                Ok(ids)
            }
            // profile reads; only some stores expose an identifier to authorize
            DataType::Gender | DataType::DateOfBirth => Ok(self
                .registry
                .entry(data_type)
                .map(|e| e.native_id)
                .into_iter()
                .collect()),
            other => with_companion(other),
        }
    }

    pub async fn query(&self, query: &Query) -> Result<Vec<Sample>, HealthError> {
        let data_type: DataType = query.data_type.parse()?;
        let range = query.range()?;
        let unit = query.unit.as_deref();

        match data_type {
            DataType::Gender => Ok(vec![self.read_gender(&range).await?]),
            DataType::DateOfBirth => Ok(vec![self.read_date_of_birth().await?]),
            DataType::Activity => self.query_activity(&range).await,
            DataType::CaloriesActive => self.query_active_calories(&range, unit).await,
            DataType::Calories | DataType::Distance => {
                self.query_summable(data_type, &range, unit).await
            }
            DataType::Steps
            | DataType::DistanceCycling
            | DataType::CaloriesBasal
            | DataType::Height
            | DataType::Weight
            | DataType::HeartRate
            | DataType::FatPercentage => self.query_direct(data_type, &range, unit).await,
        }
    }

    async fn read_gender(&self, range: &TimeRange) -> Result<Sample, HealthError> {
        let gender = self.native.read_gender().await?;
        Ok(Sample {
            value: SampleValue::Text(gender),
            ..Sample::quantity(range.start, range.end, 0.0)
        })
    }

    async fn read_date_of_birth(&self) -> Result<Sample, HealthError> {
        let born = self.native.read_date_of_birth().await?;
        let local = born.with_timezone(&self.offset).date_naive();
        Ok(Sample {
            value: SampleValue::DateOfBirth(BirthDate {
                day: local.day(),
                month: local.month(),
                year: local.year(),
            }),
            ..Sample::quantity(born, born, 0.0)
        })
    }

    async fn query_activity(&self, range: &TimeRange) -> Result<Vec<Sample>, HealthError> {
        let unit = self.registry.unit_of(DataType::Activity);
        let workouts = self.native.find_workouts().await?;
        let mut samples: Vec<Sample> = workouts
            .into_iter()
            .filter(|w| range.encloses(w.start, w.end))
            .map(|w| Sample {
                start_date: w.start,
                end_date: w.end,
                value: SampleValue::Text(self.activities.from_native(&w.activity_type).to_string()),
                unit: unit.map(String::from),
                source: w.source,
                calories: w.total_energy,
                distance: w.total_distance,
            })
            .collect();

        if let Some(sleep_id) = self.registry.sleep_analysis_id() {
            tracing::debug!(sleep_id, "merging sleep analysis into activity");
            for raw in self.native.query_samples(sleep_id, range, None).await? {
                let awake = match &raw.value {
                    Value::Number(n) => n.as_f64() == Some(0.0),
                    Value::String(s) => s.trim() == "0",
                    _ => false,
                };
                let label = if awake { SLEEP_AWAKE } else { SLEEP };
                samples.push(Sample {
                    start_date: raw.start,
                    end_date: raw.end,
                    value: SampleValue::Text(label.to_string()),
                    unit: unit.map(String::from),
                    source: raw.source,
                    calories: None,
                    distance: None,
                });
            }
        }

        samples.sort_by_key(|s| (s.start_date, s.end_date));
        Ok(samples)
    }

    /// Calories or distance: composite where the store splits them, direct otherwise
    async fn query_summable(
        &self,
        data_type: DataType,
        range: &TimeRange,
        unit: Option<&str>,
    ) -> Result<Vec<Sample>, HealthError> {
        match self.registry.companion_of(data_type) {
            Some(companion) => {
                tracing::debug!(%data_type, %companion, "composite query");
                let unit = unit.or(self.registry.unit_of(data_type));
                let primary = self.query_direct(data_type, range, unit).await?;
                let secondary = self.query_direct(companion, range, unit).await?;
                Ok(merge_samples(primary, secondary))
            }
            None => self.query_direct(data_type, range, unit).await,
        }
    }

    async fn query_direct(
        &self,
        data_type: DataType,
        range: &TimeRange,
        unit: Option<&str>,
    ) -> Result<Vec<Sample>, HealthError> {
        let entry = self.registry.entry(data_type)?;
        let unit = unit.or(entry.unit);
        let raw = self.native.query_samples(entry.native_id, range, unit).await?;

        if raw.is_empty() {
            if let Some(method) = self.registry.measurement_fallback(data_type) {
                tracing::debug!(%data_type, method, "empty sample query, reading profile");
                let measurement = self.native.read_body_measure(method, unit).await?;
                return Ok(measurement
                    .map(|m| {
                        let at = m.date.unwrap_or(range.end);
                        let sample = Sample::quantity(at, at, m.value);
                        match unit.map(String::from).or(m.unit) {
                            Some(unit) => sample.with_unit(unit),
                            None => sample,
                        }
                    })
                    .into_iter()
                    .collect());
            }
        }

        raw.into_iter()
            .map(|r| {
                Ok(Sample {
                    value: SampleValue::Quantity(numeric(&r.value, data_type)?),
                    unit: unit.map(String::from).or(r.unit),
                    source: r.source,
                    ..Sample::quantity(r.start, r.end, 0.0)
                })
            })
            .collect()
    }

    /// Basal rate for `range`: observed basal energy over the range when there is any, otherwise
    /// the average over the lookback window ending at the range end.
    pub async fn basal_rate(&self, range: &TimeRange) -> Result<BasalRate, HealthError> {
        let basal_id = self.registry.native_id_of(DataType::CaloriesBasal)?;
        let unit = self.registry.unit_of(DataType::CaloriesBasal);

        let observed = self.native.query_samples(basal_id, range, unit).await?;
        let seconds = range.duration().num_seconds();
        if !observed.is_empty() && seconds > 0 {
            let sum = sum_of(&observed, DataType::CaloriesBasal)?;
            if sum > 0.0 {
                return Ok(BasalRate {
                    kcal_per_second: sum / seconds as f64,
                });
            }
        }
        self.fallback_basal_rate(range).await
    }

    async fn fallback_basal_rate(&self, range: &TimeRange) -> Result<BasalRate, HealthError> {
        let basal_id = self.registry.native_id_of(DataType::CaloriesBasal)?;
        let unit = self.registry.unit_of(DataType::CaloriesBasal);
        let window = TimeRange::new(range.end - self.basal_lookback, range.end)?;
        tracing::debug!(
            start = %window.start,
            end = %window.end,
            "estimating basal rate from lookback"
        );

        let samples = self.native.query_samples(basal_id, &window, unit).await?;
        let sum = sum_of(&samples, DataType::CaloriesBasal)?;
        let seconds = window.duration().num_seconds();
        if sum == 0.0 || seconds == 0 {
            return Err(HealthError::InsufficientBasalData {
                start: window.start,
                end: window.end,
            });
        }
        Ok(BasalRate {
            kcal_per_second: sum / seconds as f64,
        })
    }

    /// True when the store records active energy itself and reports basal energy separately.
    /// Total calories are then the active + basal composite and nothing has to be derived.
    fn records_active_energy(&self) -> bool {
        self.registry.companion_of(DataType::Calories) == Some(DataType::CaloriesBasal)
    }

    async fn query_active_calories(
        &self,
        range: &TimeRange,
        unit: Option<&str>,
    ) -> Result<Vec<Sample>, HealthError> {
        if self.records_active_energy() {
            return self.query_direct(DataType::Calories, range, unit).await;
        }
        let basal = self.basal_rate(range).await?;
        tracing::debug!(kcal_per_second = basal.kcal_per_second, "deriving active calories");
        let totals = self.query_summable(DataType::Calories, range, unit).await?;
        Ok(totals
            .iter()
            .map(|total| derive_active_calories(total, &basal))
            .collect())
    }

    pub async fn query_aggregated(&self, query: &Query) -> Result<Aggregated, HealthError> {
        let data_type: DataType = query.data_type.parse()?;
        let range = query.range()?;
        let unit = query.unit.as_deref();

        match data_type {
            DataType::Height
            | DataType::Weight
            | DataType::HeartRate
            | DataType::FatPercentage
            | DataType::Gender
            | DataType::DateOfBirth => return Err(HealthError::UnsupportedOperation(data_type)),
            DataType::Steps
            | DataType::Distance
            | DataType::DistanceCycling
            | DataType::Calories
            | DataType::CaloriesActive
            | DataType::CaloriesBasal
            | DataType::Activity => {}
        }

        let template = match query.bucket {
            Some(size) => bucketize(&range, size, self.offset)?,
            None => vec![Bucket::new(range.start, range.end)],
        };
        let span = match (template.first(), template.last()) {
            (Some(first), Some(last)) => TimeRange::new(first.start_date, last.end_date)?,
            _ => range,
        };

        let buckets = self
            .aggregate_buckets(data_type, &range, &span, template, unit)
            .await?;

        let samples: Vec<Sample> = if data_type == DataType::Activity {
            buckets.into_iter().map(Bucket::into_summary).collect()
        } else {
            let unit = unit.or(self.registry.unit_of(match data_type {
                DataType::CaloriesActive => DataType::Calories,
                other => other,
            }));
            buckets.into_iter().map(|b| b.into_quantity(unit)).collect()
        };

        match query.bucket {
            Some(_) => Ok(Aggregated::Buckets(samples)),
            None => samples
                .into_iter()
                .next()
                .map(Aggregated::Total)
                .ok_or_else(|| HealthError::InvalidResponse("empty aggregation".into())),
        }
    }

    async fn aggregate_buckets(
        &self,
        data_type: DataType,
        range: &TimeRange,
        span: &TimeRange,
        template: Vec<Bucket>,
        unit: Option<&str>,
    ) -> Result<Vec<Bucket>, HealthError> {
        match data_type {
            DataType::Activity => {
                let samples = self.query_activity(span).await?;
                Ok(self.fold(template, &samples))
            }
            DataType::CaloriesActive if self.records_active_energy() => {
                self.aggregate_direct(DataType::Calories, span, template, unit)
                    .await
            }
            DataType::CaloriesActive => {
                let basal = self.basal_rate(range).await?;
                let totals = self.query_summable(DataType::Calories, span, unit).await?;
                let active: Vec<Sample> = totals
                    .iter()
                    .map(|total| derive_active_calories(total, &basal))
                    .collect();
                Ok(self.fold(template, &active))
            }
            DataType::CaloriesBasal => {
                let mut buckets = self
                    .aggregate_direct(data_type, span, template, unit)
                    .await?;
                if buckets.iter().any(|b| b.samples == 0) {
                    self.fill_basal_gaps(range, &mut buckets).await?;
                }
                Ok(buckets)
            }
            DataType::Calories | DataType::Distance => {
                match self.registry.companion_of(data_type) {
                    Some(companion) => {
                        tracing::debug!(%data_type, %companion, "composite aggregation");
                        let primary = self
                            .aggregate_direct(data_type, span, template.clone(), unit)
                            .await?;
                        let secondary = self
                            .aggregate_direct(companion, span, template, unit)
                            .await?;
                        merge_buckets(data_type, primary, secondary)
                    }
                    None => self.aggregate_direct(data_type, span, template, unit).await,
                }
            }
            DataType::Steps | DataType::DistanceCycling => {
                self.aggregate_direct(data_type, span, template, unit).await
            }
            DataType::Height
            | DataType::Weight
            | DataType::HeartRate
            | DataType::FatPercentage
            | DataType::Gender
            | DataType::DateOfBirth => Err(HealthError::UnsupportedOperation(data_type)),
        }
    }

    async fn aggregate_direct(
        &self,
        data_type: DataType,
        span: &TimeRange,
        template: Vec<Bucket>,
        unit: Option<&str>,
    ) -> Result<Vec<Bucket>, HealthError> {
        let samples = self.query_direct(data_type, span, unit).await?;
        Ok(self.fold(template, &samples))
    }

    /// Buckets without any basal observation get the lookback average
    async fn fill_basal_gaps(
        &self,
        range: &TimeRange,
        buckets: &mut [Bucket],
    ) -> Result<(), HealthError> {
        let rate = match self.fallback_basal_rate(range).await {
            Ok(rate) => rate,
            Err(HealthError::InsufficientBasalData { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        for bucket in buckets.iter_mut().filter(|b| b.samples == 0) {
            bucket.total = rate.over(bucket.duration());
        }
        Ok(())
    }

    fn fold(&self, mut buckets: Vec<Bucket>, samples: &[Sample]) -> Vec<Bucket> {
        fold_all(&mut buckets, samples, self.straddle_policy);
        buckets
    }

    pub async fn store(&self, request: &StoreRequest) -> Result<(), HealthError> {
        let data_type: DataType = request.data_type.parse()?;
        match data_type {
            DataType::Gender
            | DataType::DateOfBirth
            | DataType::CaloriesBasal
            | DataType::CaloriesActive => Err(HealthError::NotWriteable(data_type)),
            DataType::Activity => {
                let range = TimeRange::new(request.start_date, request.end_date)?;
                let label = request.value.as_label().ok_or_else(|| {
                    HealthError::InvalidArgument("activity value must be an activity name".into())
                })?;
                let record = WorkoutRecord {
                    activity_type: self.activities.to_native_strict(label)?,
                    start: range.start,
                    end: range.end,
                    energy: request.calories,
                    distance: request.distance,
                    source_name: request.source_name.as_deref(),
                };
                self.native.save_workout(&record).await
            }
            DataType::Steps
            | DataType::Distance
            | DataType::DistanceCycling
            | DataType::Calories
            | DataType::Height
            | DataType::Weight
            | DataType::HeartRate
            | DataType::FatPercentage => {
                let range = TimeRange::new(request.start_date, request.end_date)?;
                let entry = self.registry.entry(data_type)?;
                let amount = request.value.as_f64().ok_or_else(|| {
                    HealthError::InvalidArgument(format!("{data_type} value must be numeric"))
                })?;
                let record = QuantityRecord {
                    sample_type: entry.native_id,
                    start: range.start,
                    end: range.end,
                    amount,
                    unit: request.unit.as_deref().or(entry.unit),
                    source_name: request.source_name.as_deref(),
                };
                self.native.save_quantity(&record).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{DateEncoding, ReplayBridge};
    use crate::types::{BucketSize, Platform};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn composer(fixture: Value, platform: Platform) -> (Arc<ReplayBridge>, QueryComposer) {
        let bridge = Arc::new(
            ReplayBridge::from_json(&fixture.to_string(), DateEncoding::for_platform(platform))
                .unwrap(),
        );
        let config = HealthConfig::for_platform(platform);
        let native = NativeCallAdapter::new(bridge.clone(), platform, config.utc_offset().unwrap());
        let composer = QueryComposer::new(
            native,
            Arc::new(Registry::for_platform(platform)),
            Arc::new(ActivityTranslator::for_platform(platform)),
            &config,
        )
        .unwrap();
        (bridge, composer)
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 3, day, hour, 0, 0).unwrap()
    }

    fn record(start: DateTime<Utc>, end: DateTime<Utc>, quantity: f64) -> Value {
        json!({"startDate": start.to_rfc3339(), "endDate": end.to_rfc3339(), "quantity": quantity})
    }

    fn quantities(samples: &[Sample]) -> Vec<f64> {
        samples.iter().filter_map(|s| s.value.as_f64()).collect()
    }

    fn methods(bridge: &ReplayBridge) -> Vec<String> {
        bridge.calls().into_iter().map(|c| c.method).collect()
    }

    #[tokio::test]
    async fn test_direct_query_attaches_registry_unit() {
        let fixture = json!({"samples": {"com.google.step_count.delta": [
            record(at(15, 8), at(15, 9), 1200.0),
            {"startDate": at(15, 9).to_rfc3339(), "endDate": at(15, 10).to_rfc3339(), "value": "300"}
        ]}});
        let (_, composer) = composer(fixture, Platform::GoogleFit);
        let samples = composer
            .query(&Query::new("steps", at(15, 0), at(16, 0)))
            .await
            .unwrap();
        assert_eq!(quantities(&samples), vec![1200.0, 300.0]);
        assert!(samples.iter().all(|s| s.unit.as_deref() == Some("count")));
    }

    #[tokio::test]
    async fn test_caller_unit_overrides_registry() {
        let (bridge, composer) = composer(json!({}), Platform::HealthKit);
        composer
            .query(&Query::new("distance.cycling", at(15, 0), at(16, 0)).with_unit("km"))
            .await
            .unwrap();
        assert_eq!(bridge.calls()[0].args[0]["unit"], "km");
    }

    #[tokio::test]
    async fn test_empty_weight_query_reads_profile() {
        let fixture = json!({"weight": {"value": 72.5, "unit": "kg"}});
        let (bridge, composer) = composer(fixture, Platform::HealthKit);
        let samples = composer
            .query(&Query::new("weight", at(15, 0), at(16, 0)))
            .await
            .unwrap();
        assert_eq!(methods(&bridge), vec!["querySampleType", "readWeight"]);
        assert_eq!(samples, vec![Sample::quantity(at(16, 0), at(16, 0), 72.5).with_unit("kg")]);
    }

    #[tokio::test]
    async fn test_composite_distance_sums_identical_intervals() {
        let fixture = json!({"samples": {
            "HKQuantityTypeIdentifierDistanceWalkingRunning": [record(at(15, 8), at(15, 9), 500.0)],
            "HKQuantityTypeIdentifierDistanceCycling": [
                record(at(15, 8), at(15, 9), 300.0),
                record(at(15, 10), at(15, 11), 100.0)
            ]
        }});
        let (bridge, composer) = composer(fixture, Platform::HealthKit);
        let samples = composer
            .query(&Query::new("distance", at(15, 0), at(16, 0)))
            .await
            .unwrap();
        assert_eq!(quantities(&samples), vec![800.0, 100.0]);
        assert_eq!(bridge.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_composite_component_failure_aborts() {
        let fixture = json!({"failures": {
            "querySampleType:HKQuantityTypeIdentifierDistanceCycling": "cycling unavailable"
        }});
        let (_, composer) = composer(fixture, Platform::HealthKit);
        let err = composer
            .query(&Query::new("distance", at(15, 0), at(16, 0)))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cycling unavailable");
    }

    #[tokio::test]
    async fn test_active_calories_subtract_basal_and_clamp() {
        // 225 kcal over two hours is exactly 1/32 kcal per second
        let fixture = json!({"samples": {
            "com.google.calories.expended": [
                record(at(15, 8), at(15, 9), 200.0),
                record(at(15, 9), at(15, 10), 50.0)
            ],
            "com.google.calories.bmr": [record(at(15, 8), at(15, 10), 225.0)]
        }});
        let (_, composer) = composer(fixture, Platform::GoogleFit);
        let samples = composer
            .query(&Query::new("calories.active", at(15, 8), at(15, 10)))
            .await
            .unwrap();
        assert_eq!(quantities(&samples), vec![87.5, 0.0]);
    }

    #[tokio::test]
    async fn test_active_calories_fall_back_to_lookback_window() {
        let fixture = json!({"samples": {
            "com.google.calories.expended": [record(at(15, 8), at(15, 9), 500.0)],
            "com.google.calories.bmr": [record(at(10, 0), at(11, 0), 1209.6)]
        }});
        let (bridge, composer) = composer(fixture, Platform::GoogleFit);
        let samples = composer
            .query(&Query::new("calories.active", at(15, 8), at(15, 9)))
            .await
            .unwrap();
        // 1209.6 kcal over seven days is 0.002 kcal/s
        let expected = 500.0 - (1209.6 / (7.0 * 86_400.0)) * 3600.0;
        assert_eq!(quantities(&samples), vec![expected]);

        let windows: Vec<_> = bridge
            .calls()
            .iter()
            .map(|c| c.args[0]["startDate"].clone())
            .collect();
        assert_eq!(windows[1], json!((at(15, 9) - Duration::days(7)).timestamp() * 1000));
    }

    #[tokio::test]
    async fn test_missing_basal_data_is_an_error() {
        let fixture = json!({"samples": {
            "com.google.calories.expended": [record(at(15, 8), at(15, 9), 500.0)]
        }});
        let (bridge, composer) = composer(fixture, Platform::GoogleFit);
        let err = composer
            .query(&Query::new("calories.active", at(15, 8), at(15, 9)))
            .await
            .unwrap_err();
        assert!(matches!(err, HealthError::InsufficientBasalData { .. }));
        assert!(bridge
            .calls()
            .iter()
            .all(|c| c.args[0]["sampleType"] == "com.google.calories.bmr"));
    }

    #[test]
    fn test_derived_value_is_exact_above_basal() {
        let basal = BasalRate { kcal_per_second: 0.25 };
        let total = Sample::quantity(at(15, 8), at(15, 9), 1000.0);
        assert_eq!(derive_active_calories(&total, &basal).value, SampleValue::Quantity(100.0));

        let small = Sample::quantity(at(15, 8), at(15, 9), 899.0);
        assert_eq!(derive_active_calories(&small, &basal).value, SampleValue::Quantity(0.0));
    }

    fn healthkit_energy_fixture() -> Value {
        json!({"samples": {
            "HKQuantityTypeIdentifierActiveEnergyBurned": [record(at(15, 8), at(15, 9), 100.0)],
            "HKQuantityTypeIdentifierBasalEnergyBurned": [
                {"startDate": at(15, 8).to_rfc3339(),
                 "endDate": (at(15, 8) + Duration::minutes(30)).to_rfc3339(), "quantity": 35.0},
                {"startDate": (at(15, 8) + Duration::minutes(30)).to_rfc3339(),
                 "endDate": at(15, 9).to_rfc3339(), "quantity": 35.0}
            ]
        }})
    }

    #[tokio::test]
    async fn test_healthkit_active_calories_are_read_directly() {
        let (bridge, composer) = composer(healthkit_energy_fixture(), Platform::HealthKit);
        let samples = composer
            .query(&Query::new("calories.active", at(15, 8), at(15, 9)))
            .await
            .unwrap();
        assert_eq!(
            samples,
            vec![Sample::quantity(at(15, 8), at(15, 9), 100.0).with_unit("kcal")]
        );
        let calls = bridge.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].args[0]["sampleType"],
            "HKQuantityTypeIdentifierActiveEnergyBurned"
        );
    }

    #[tokio::test]
    async fn test_healthkit_active_calories_aggregate_without_basal() {
        let (_, composer) = composer(healthkit_energy_fixture(), Platform::HealthKit);
        let result = composer
            .query_aggregated(
                &Query::new("calories.active", at(15, 6), at(15, 10)).bucketed(BucketSize::Hour),
            )
            .await
            .unwrap();
        let Aggregated::Buckets(buckets) = result else {
            panic!("expected buckets");
        };
        assert_eq!(quantities(&buckets), vec![0.0, 0.0, 100.0, 0.0, 0.0]);

        let total = composer
            .query_aggregated(&Query::new("calories", at(15, 8), at(15, 9)))
            .await
            .unwrap();
        let Aggregated::Total(total) = total else {
            panic!("expected a total");
        };
        assert_eq!(total.value, SampleValue::Quantity(170.0));
    }

    #[tokio::test]
    async fn test_activity_unions_workouts_and_sleep() {
        let fixture = json!({
            "workouts": [
                {"startDate": at(15, 7).to_rfc3339(), "endDate": at(15, 8).to_rfc3339(),
                 "activityType": "HKWorkoutActivityTypeRunning", "totalEnergyBurned": 320.0,
                 "totalDistance": 5000.0},
                {"startDate": at(12, 7).to_rfc3339(), "endDate": at(12, 8).to_rfc3339(),
                 "activityType": "HKWorkoutActivityTypeYoga"}
            ],
            "samples": {"HKCategoryTypeIdentifierSleepAnalysis": [
                {"startDate": at(15, 0).to_rfc3339(), "endDate": at(15, 5).to_rfc3339(), "value": 1},
                {"startDate": at(15, 5).to_rfc3339(), "endDate": at(15, 6).to_rfc3339(), "value": 0}
            ]}
        });
        let (bridge, composer) = composer(fixture, Platform::HealthKit);
        let samples = composer
            .query(&Query::new("activity", at(15, 0), at(16, 0)))
            .await
            .unwrap();

        let labels: Vec<_> = samples.iter().filter_map(|s| s.value.as_label()).collect();
        assert_eq!(labels, vec!["sleep", "sleep.awake", "running"]);
        assert_eq!(samples[2].calories, Some(320.0));
        assert_eq!(methods(&bridge), vec!["findWorkouts", "querySampleType"]);
    }

    #[tokio::test]
    async fn test_aggregation_rejects_unsupported_types_before_calling() {
        let (bridge, composer) = composer(json!({}), Platform::HealthKit);
        for data_type in ["heart_rate", "gender", "weight"] {
            let err = composer
                .query_aggregated(&Query::new(data_type, at(15, 0), at(16, 0)))
                .await
                .unwrap_err();
            assert!(matches!(err, HealthError::UnsupportedOperation(_)));
        }
        assert!(bridge.calls().is_empty());
    }

    #[tokio::test]
    async fn test_daily_steps_aggregation() {
        let fixture = json!({"samples": {"HKQuantityTypeIdentifierStepCount": [
            record(at(13, 8), at(13, 9), 1000.0),
            record(at(13, 18), at(13, 19), 500.0),
            record(at(14, 12), at(14, 13), 700.0)
        ]}});
        let (bridge, composer) = composer(fixture, Platform::HealthKit);
        let result = composer
            .query_aggregated(
                &Query::new("steps", at(13, 6), at(15, 0)).bucketed(BucketSize::Day),
            )
            .await
            .unwrap();

        let Aggregated::Buckets(buckets) = result else {
            panic!("expected buckets");
        };
        assert_eq!(quantities(&buckets), vec![1500.0, 700.0, 0.0]);
        assert_eq!(buckets[0].start_date, at(13, 0));
        assert_eq!(buckets[2].start_date, at(15, 0));
        assert_eq!(bridge.calls()[0].args[0]["startDate"], json!(at(13, 0).timestamp()));
    }

    #[tokio::test]
    async fn test_activity_aggregation_accumulates_per_label() {
        let fixture = json!({"workouts": [
            {"startDate": at(15, 7).to_rfc3339(), "endDate": at(15, 8).to_rfc3339(),
             "activityType": "running", "totalEnergyBurned": 300.0},
            {"startDate": at(15, 18).to_rfc3339(), "endDate": at(15, 18).to_rfc3339(),
             "activityType": "running", "totalEnergyBurned": 0.0}
        ]});
        let (_, composer) = composer(fixture, Platform::GoogleFit);
        let result = composer
            .query_aggregated(&Query::new("activity", at(15, 0), at(16, 0)))
            .await
            .unwrap();

        let Aggregated::Total(total) = result else {
            panic!("expected a total");
        };
        let SampleValue::ActivitySummary(summary) = total.value else {
            panic!("expected an activity summary");
        };
        assert_eq!(summary["running"].duration, 3_600_000);
        assert_eq!(summary["running"].calories, 300.0);
    }

    #[tokio::test]
    async fn test_basal_aggregation_fills_empty_buckets() {
        let fixture = json!({"samples": {"com.google.calories.bmr": [
            record(at(14, 0), at(15, 0), 1680.0),
            record(at(15, 0), at(15, 12), 840.0)
        ]}});
        let (_, composer) = composer(fixture, Platform::GoogleFit);
        let result = composer
            .query_aggregated(
                &Query::new("calories.basal", at(15, 0), at(17, 0)).bucketed(BucketSize::Day),
            )
            .await
            .unwrap();

        let Aggregated::Buckets(buckets) = result else {
            panic!("expected buckets");
        };
        // the empty day gets the lookback average: 2520 kcal over seven days
        let filled = (2520.0 / 604_800.0) * 86_400.0;
        assert_eq!(quantities(&buckets), vec![840.0, filled, filled]);
    }

    #[test]
    fn test_bucket_merge_requires_matching_starts() {
        let left = vec![Bucket::new(at(13, 0), at(14, 0)), Bucket::new(at(14, 0), at(15, 0))];
        let right = vec![Bucket::new(at(13, 0), at(14, 0)), Bucket::new(at(14, 1), at(15, 0))];
        let err = merge_buckets(DataType::Distance, left.clone(), right).unwrap_err();
        assert!(matches!(
            err,
            HealthError::BucketCompositionMismatch { expected: Some(e), found: Some(f), .. }
                if e == at(14, 0) && f == at(14, 1)
        ));

        let err = merge_buckets(DataType::Distance, left, Vec::new()).unwrap_err();
        assert!(matches!(err, HealthError::BucketCompositionMismatch { found: None, .. }));
    }

    #[tokio::test]
    async fn test_store_rejects_read_only_types_without_calling() {
        let (bridge, composer) = composer(json!({}), Platform::HealthKit);
        for data_type in ["gender", "date_of_birth", "calories.basal", "calories.active"] {
            let request = StoreRequest::new(
                data_type,
                at(15, 8),
                at(15, 9),
                SampleValue::Text("female".into()),
            );
            let err = composer.store(&request).await.unwrap_err();
            assert!(matches!(err, HealthError::NotWriteable(_)));
        }
        assert!(bridge.calls().is_empty());
    }

    #[tokio::test]
    async fn test_store_activity_uses_strict_translation() {
        let (bridge, composer) = composer(json!({}), Platform::HealthKit);
        let unknown = StoreRequest::new(
            "activity",
            at(15, 8),
            at(15, 9),
            SampleValue::Text("underwater_chess".into()),
        );
        let err = composer.store(&unknown).await.unwrap_err();
        assert!(matches!(err, HealthError::UnknownActivity(_)));
        assert!(bridge.calls().is_empty());

        let mut ride = StoreRequest::new(
            "activity",
            at(15, 8),
            at(15, 9),
            SampleValue::Text("biking.road".into()),
        );
        ride.calories = Some(450.0);
        composer.store(&ride).await.unwrap();
        let calls = bridge.calls();
        let call = &calls[0];
        assert_eq!(call.method, "saveWorkout");
        assert_eq!(call.args[0]["activityType"], "HKWorkoutActivityTypeCycling");
        assert_eq!(call.args[0]["energy"], 450.0);
    }

    #[tokio::test]
    async fn test_store_quantity_leaves_request_untouched() {
        let (bridge, composer) = composer(json!({}), Platform::GoogleFit);
        let request = StoreRequest::new(
            "weight",
            at(15, 8),
            at(15, 8),
            SampleValue::Text("71.5".into()),
        );
        let before = request.clone();
        composer.store(&request).await.unwrap();
        composer.store(&request).await.unwrap();

        assert_eq!(request, before);
        let calls = bridge.calls();
        assert_eq!(calls[0].args, calls[1].args);
        assert_eq!(
            calls[0].args[0],
            json!({
                "sampleType": "com.google.weight",
                "startDate": at(15, 8).timestamp() * 1000,
                "endDate": at(15, 8).timestamp() * 1000,
                "amount": 71.5,
                "unit": "kg",
            })
        );
    }

    #[tokio::test]
    async fn test_authorization_expands_derived_inputs() {
        let (bridge, composer) = composer(json!({}), Platform::HealthKit);
        composer
            .request_authorization(&["calories.active", "steps", "activity"])
            .await
            .unwrap();
        let calls = bridge.calls();
        let args = &calls[0].args[0];
        assert_eq!(
            args["readTypes"],
            json!([
                "HKQuantityTypeIdentifierActiveEnergyBurned",
                "HKQuantityTypeIdentifierStepCount",
                "HKWorkoutTypeIdentifier",
                "HKCategoryTypeIdentifierSleepAnalysis"
            ])
        );
        assert_eq!(
            args["writeTypes"],
            json!(["HKQuantityTypeIdentifierStepCount", "HKWorkoutTypeIdentifier"])
        );
    }

    #[tokio::test]
    async fn test_authorization_for_derived_active_calories_reads_every_input() {
        let (bridge, composer) = composer(json!({}), Platform::GoogleFit);
        composer.request_authorization(&["calories.active"]).await.unwrap();
        let calls = bridge.calls();
        assert_eq!(
            calls[0].args[0]["readTypes"],
            json!(["com.google.calories.expended", "com.google.calories.bmr"])
        );
        assert_eq!(calls[0].args[0]["writeTypes"], json!([]));
    }

    #[tokio::test]
    async fn test_characteristic_authorization_needs_no_identifier() {
        let (bridge, composer) = composer(json!({}), Platform::GoogleFit);
        composer
            .request_authorization(&["gender", "date_of_birth"])
            .await
            .unwrap();
        assert!(bridge.calls().is_empty());

        composer.request_authorization(&["gender", "steps"]).await.unwrap();
        let calls = bridge.calls();
        assert_eq!(calls[0].args[0]["readTypes"], json!(["com.google.step_count.delta"]));
    }

    #[tokio::test]
    async fn test_authorization_fails_before_calling_on_unknown_type() {
        let (bridge, composer) = composer(json!({}), Platform::HealthKit);
        let err = composer
            .request_authorization(&["steps", "blood_glucose"])
            .await
            .unwrap_err();
        assert!(matches!(err, HealthError::UnknownDataType(ref t) if t == "blood_glucose"));

        let none: [&str; 0] = [];
        composer.request_authorization(&none).await.unwrap();
        assert!(bridge.calls().is_empty());
    }
}
