//! Aggregation and bucketing engine
//!
//! Time ranges are cut into calendar-aligned buckets in the user's local calendar (a fixed UTC
//! offset). Hours start on the hour, days at local midnight, weeks on Monday, months and years
//! on their first day. Bucket generation starts from the boundary at or before the range start
//! and advances one calendar step at a time until a boundary reaches the range end, so the last
//! bucket may extend past it.
//!
//! Samples are folded with closed containment: a sample lands in every bucket whose
//! `[start, end]` fully contains the sample's interval. Samples crossing a boundary fall under
//! the configured [`StraddlePolicy`]. Accumulation is plain addition, so fold order never changes
//! the result.

use crate::error::HealthError;
use crate::types::{
    ActivityTotals, BucketSize, Sample, SampleValue, StraddlePolicy, TimeRange,
};
use chrono::{
    DateTime, Datelike, Days, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, TimeZone,
    Timelike, Utc,
};
use std::collections::BTreeMap;

/// One calendar slice with its accumulators
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Sum of quantity samples folded into this bucket
    pub total: f64,
    /// Per-activity accumulators, keyed by neutral activity label
    pub activities: BTreeMap<String, ActivityTotals>,
    /// Number of samples (or sample shares) folded in
    pub samples: usize,
}

impl Bucket {
    pub fn new(start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> Self {
        Self {
            start_date,
            end_date,
            total: 0.0,
            activities: BTreeMap::new(),
            samples: 0,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end_date - self.start_date
    }

    pub fn contains(&self, sample: &Sample) -> bool {
        sample.start_date >= self.start_date && sample.end_date <= self.end_date
    }

    /// Fold a whole sample into this bucket
    pub fn fold_sample(&mut self, sample: &Sample) {
        self.fold_share(sample, 1.0, sample.duration());
    }

    /// Fold `fraction` of a sample's quantities, crediting `time` to its activity
    fn fold_share(&mut self, sample: &Sample, fraction: f64, time: Duration) {
        match &sample.value {
            SampleValue::Quantity(v) => self.total += v * fraction,
            SampleValue::Text(label) => {
                let share = ActivityTotals {
                    duration: time.num_milliseconds(),
                    distance: sample.distance.unwrap_or(0.0) * fraction,
                    calories: sample.calories.unwrap_or(0.0) * fraction,
                };
                self.activities.entry(label.clone()).or_default().add(&share);
            }
            other => {
                tracing::debug!(value = ?other, "skipping non-aggregatable sample value");
                return;
            }
        }
        self.samples += 1;
    }

    pub fn into_quantity(self, unit: Option<&str>) -> Sample {
        let sample = Sample::quantity(self.start_date, self.end_date, self.total);
        match unit {
            Some(unit) => sample.with_unit(unit),
            None => sample,
        }
    }

    pub fn into_summary(self) -> Sample {
        Sample {
            value: SampleValue::ActivitySummary(self.activities),
            ..Sample::quantity(self.start_date, self.end_date, 0.0)
        }
    }
}

fn to_local(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDateTime {
    instant.with_timezone(&offset).naive_local()
}

fn from_local(local: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    let utc = local - Duration::seconds(i64::from(offset.local_minus_utc()));
    Utc.from_utc_datetime(&utc)
}

fn midnight(date: NaiveDate) -> Option<NaiveDateTime> {
    date.and_hms_opt(0, 0, 0)
}

/// Latest bucket boundary at or before `instant`
pub fn align_start(
    instant: DateTime<Utc>,
    size: BucketSize,
    offset: FixedOffset,
) -> Result<DateTime<Utc>, HealthError> {
    let local = to_local(instant, offset);
    let date = local.date();
    let aligned = match size {
        BucketSize::Hour => date.and_hms_opt(local.hour(), 0, 0),
        BucketSize::Day => midnight(date),
        BucketSize::Week => date
            .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
            .and_then(midnight),
        BucketSize::Month => date.with_day(1).and_then(midnight),
        BucketSize::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1).and_then(midnight),
    };
    aligned.map(|local| from_local(local, offset)).ok_or_else(|| {
        HealthError::InvalidArgument(format!("cannot align {instant} to {}", size.as_str()))
    })
}

/// Boundary one calendar step after `boundary`
pub fn advance(
    boundary: DateTime<Utc>,
    size: BucketSize,
    offset: FixedOffset,
) -> Option<DateTime<Utc>> {
    let local = to_local(boundary, offset);
    let next = match size {
        BucketSize::Hour => local.checked_add_signed(Duration::hours(1)),
        BucketSize::Day => local.checked_add_days(Days::new(1)),
        BucketSize::Week => local.checked_add_days(Days::new(7)),
        BucketSize::Month => local.checked_add_months(Months::new(1)),
        BucketSize::Year => local.checked_add_months(Months::new(12)),
    };
    next.map(|local| from_local(local, offset))
}

/// Ordered, gap-free buckets covering `range`. Always at least one.
pub fn bucketize(
    range: &TimeRange,
    size: BucketSize,
    offset: FixedOffset,
) -> Result<Vec<Bucket>, HealthError> {
    let mut cursor = align_start(range.start, size, offset)?;
    let mut buckets = Vec::new();
    loop {
        let next = advance(cursor, size, offset).ok_or_else(|| {
            let size = size.as_str();
            HealthError::InvalidArgument(format!("cannot advance {cursor} by one {size}"))
        })?;
        buckets.push(Bucket::new(cursor, next));
        if next > range.end {
            break;
        }
        cursor = next;
    }
    Ok(buckets)
}

/// Fold every sample into the buckets that hold it
pub fn fold_all(buckets: &mut [Bucket], samples: &[Sample], policy: StraddlePolicy) {
    for sample in samples {
        let mut contained = false;
        for bucket in buckets.iter_mut().filter(|b| b.contains(sample)) {
            bucket.fold_sample(sample);
            contained = true;
        }
        if !contained {
            fold_straddling(buckets, sample, policy);
        }
    }
}

fn fold_straddling(buckets: &mut [Bucket], sample: &Sample, policy: StraddlePolicy) {
    match policy {
        StraddlePolicy::Drop => {
            tracing::warn!(
                start = %sample.start_date,
                end = %sample.end_date,
                "dropping sample that crosses a bucket boundary"
            );
        }
        StraddlePolicy::StartBucket => {
            let home = buckets.iter_mut().find(|b| {
                sample.start_date >= b.start_date && sample.start_date < b.end_date
            });
            if let Some(bucket) = home {
                bucket.fold_sample(sample);
            }
        }
        StraddlePolicy::Split => {
            let length = sample.duration();
            if length <= Duration::zero() {
                return;
            }
            for bucket in buckets.iter_mut() {
                let overlap = sample.end_date.min(bucket.end_date)
                    - sample.start_date.max(bucket.start_date);
                if overlap > Duration::zero() {
                    let fraction =
                        overlap.num_milliseconds() as f64 / length.num_milliseconds() as f64;
                    bucket.fold_share(sample, fraction, overlap);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn workout(label: &str, start: DateTime<Utc>, hours: i64, calories: f64) -> Sample {
        Sample {
            value: SampleValue::Text(label.into()),
            calories: Some(calories),
            distance: Some(1000.0),
            ..Sample::quantity(start, start + Duration::hours(hours), 0.0)
        }
    }

    #[test]
    fn test_week_buckets_start_on_monday() {
        // Wednesday
        let range = TimeRange::new(at(2023, 3, 15, 10), at(2023, 3, 29, 0)).unwrap();
        let buckets = bucketize(&range, BucketSize::Week, utc()).unwrap();
        let starts: Vec<_> = buckets.iter().map(|b| b.start_date).collect();
        assert_eq!(
            starts,
            vec![at(2023, 3, 13, 0), at(2023, 3, 20, 0), at(2023, 3, 27, 0)]
        );
        assert_eq!(buckets[2].end_date, at(2023, 4, 3, 0));
    }

    #[test]
    fn test_month_buckets_follow_the_calendar() {
        let range = TimeRange::new(at(2024, 1, 15, 0), at(2024, 3, 10, 0)).unwrap();
        let buckets = bucketize(&range, BucketSize::Month, utc()).unwrap();
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[1].start_date, at(2024, 2, 1, 0));
        assert_eq!(buckets[1].duration(), Duration::days(29));
        assert_eq!(buckets[2].end_date, at(2024, 4, 1, 0));
    }

    #[test]
    fn test_day_alignment_uses_local_midnight() {
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let instant = Utc.with_ymd_and_hms(2023, 3, 15, 23, 30, 0).unwrap();
        let aligned = align_start(instant, BucketSize::Day, plus_two).unwrap();
        assert_eq!(aligned, Utc.with_ymd_and_hms(2023, 3, 15, 22, 0, 0).unwrap());
    }

    #[test]
    fn test_year_and_hour_alignment() {
        let instant = Utc.with_ymd_and_hms(2023, 7, 4, 13, 45, 12).unwrap();
        assert_eq!(
            align_start(instant, BucketSize::Year, utc()).unwrap(),
            at(2023, 1, 1, 0)
        );
        assert_eq!(
            align_start(instant, BucketSize::Hour, utc()).unwrap(),
            at(2023, 7, 4, 13)
        );
    }

    #[test]
    fn test_empty_range_still_yields_one_bucket() {
        let instant = at(2023, 3, 15, 12);
        let range = TimeRange::new(instant, instant).unwrap();
        let buckets = bucketize(&range, BucketSize::Day, utc()).unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].start_date, at(2023, 3, 15, 0));
    }

    #[test]
    fn test_range_ending_on_a_boundary_keeps_the_last_bucket() {
        let range = TimeRange::new(at(2023, 3, 13, 6), at(2023, 3, 15, 0)).unwrap();
        let mut buckets = bucketize(&range, BucketSize::Day, utc()).unwrap();
        let starts: Vec<_> = buckets.iter().map(|b| b.start_date).collect();
        assert_eq!(
            starts,
            vec![at(2023, 3, 13, 0), at(2023, 3, 14, 0), at(2023, 3, 15, 0)]
        );
        assert_eq!(buckets[2].end_date, at(2023, 3, 16, 0));

        let edge = Sample::quantity(range.end, range.end, 7.0);
        fold_all(&mut buckets, &[edge], StraddlePolicy::Drop);
        assert_eq!((buckets[1].total, buckets[2].total), (7.0, 7.0));
    }

    #[test]
    fn test_fold_order_does_not_matter() {
        let range = TimeRange::new(at(2023, 3, 13, 0), at(2023, 3, 15, 0)).unwrap();
        let samples = vec![
            workout("running", at(2023, 3, 13, 7), 1, 300.0),
            workout("biking", at(2023, 3, 13, 17), 2, 500.0),
            workout("running", at(2023, 3, 14, 6), 1, 250.0),
            Sample::quantity(at(2023, 3, 14, 9), at(2023, 3, 14, 10), 4.0),
        ];
        let mut reversed = samples.clone();
        reversed.reverse();
        let mut rotated = samples.clone();
        rotated.rotate_left(2);

        let fold = |input: &[Sample]| {
            let mut buckets = bucketize(&range, BucketSize::Day, utc()).unwrap();
            fold_all(&mut buckets, input, StraddlePolicy::Drop);
            buckets
        };
        let expected = fold(&samples);
        assert_eq!(fold(&reversed), expected);
        assert_eq!(fold(&rotated), expected);

        let day_one = &expected[0].activities;
        assert_eq!(day_one["running"].duration, 3_600_000);
        assert_eq!(day_one["biking"].calories, 500.0);
        assert_eq!(expected[1].total, 4.0);
    }

    #[test]
    fn test_straddling_samples_follow_policy() {
        let range = TimeRange::new(at(2023, 3, 13, 0), at(2023, 3, 15, 0)).unwrap();
        let night = Sample::quantity(at(2023, 3, 13, 22), at(2023, 3, 14, 2), 100.0);

        let mut dropped = bucketize(&range, BucketSize::Day, utc()).unwrap();
        fold_all(&mut dropped, &[night.clone()], StraddlePolicy::Drop);
        assert!(dropped.iter().all(|b| b.total == 0.0 && b.samples == 0));

        let mut start = bucketize(&range, BucketSize::Day, utc()).unwrap();
        fold_all(&mut start, &[night.clone()], StraddlePolicy::StartBucket);
        assert_eq!((start[0].total, start[1].total), (100.0, 0.0));

        let mut split = bucketize(&range, BucketSize::Day, utc()).unwrap();
        fold_all(&mut split, &[night], StraddlePolicy::Split);
        assert_eq!((split[0].total, split[1].total), (50.0, 50.0));
    }

    #[test]
    fn test_split_credits_overlap_time_to_activities() {
        let range = TimeRange::new(at(2023, 3, 13, 0), at(2023, 3, 15, 0)).unwrap();
        let late_ride = workout("biking", at(2023, 3, 13, 23), 4, 400.0);
        let mut buckets = bucketize(&range, BucketSize::Day, utc()).unwrap();
        fold_all(&mut buckets, &[late_ride], StraddlePolicy::Split);

        assert_eq!(buckets[0].activities["biking"].duration, 3_600_000);
        assert_eq!(buckets[0].activities["biking"].calories, 100.0);
        assert_eq!(buckets[1].activities["biking"].duration, 3 * 3_600_000);
        assert_eq!(buckets[1].activities["biking"].distance, 750.0);
    }
}
