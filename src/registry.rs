//! Type/unit registry
//!
//! Static, bidirectional mapping between neutral data types and the identifiers of a native
//! health store, plus the canonical unit of each type. One registry exists per platform. It is
//! built once and shared read-only; nothing mutates it after construction.
//!
//! Besides the plain one-to-one entries, the registry records the composition points the
//! composer has to special-case: companion types whose results are summed into a neutral total
//! (walking plus cycling distance, active plus basal energy), the sleep-analysis identifier that
//! is unioned into activity queries, and body measurements that have a profile fallback.
//!
//! Characteristics (`gender`, `date_of_birth`) only have an entry where the store exposes an
//! identifier for them. They are always read through dedicated profile calls.

use crate::error::HealthError;
use crate::types::{DataType, Platform};
use std::collections::{BTreeMap, HashMap};

/// One neutral ↔ native mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryEntry {
    pub data_type: DataType,
    pub native_id: &'static str,
    pub unit: Option<&'static str>,
}

const HEALTHKIT_ENTRIES: &[RegistryEntry] = &[
    entry(DataType::Steps, "HKQuantityTypeIdentifierStepCount", Some("count")),
    entry(DataType::Distance, "HKQuantityTypeIdentifierDistanceWalkingRunning", Some("m")),
    entry(DataType::DistanceCycling, "HKQuantityTypeIdentifierDistanceCycling", Some("m")),
    entry(DataType::Calories, "HKQuantityTypeIdentifierActiveEnergyBurned", Some("kcal")),
    entry(DataType::CaloriesBasal, "HKQuantityTypeIdentifierBasalEnergyBurned", Some("kcal")),
    entry(DataType::Height, "HKQuantityTypeIdentifierHeight", Some("m")),
    entry(DataType::Weight, "HKQuantityTypeIdentifierBodyMass", Some("kg")),
    entry(DataType::HeartRate, "HKQuantityTypeIdentifierHeartRate", Some("count/min")),
    entry(DataType::FatPercentage, "HKQuantityTypeIdentifierBodyFatPercentage", Some("%")),
    entry(DataType::Activity, "HKWorkoutTypeIdentifier", Some("activityType")),
    entry(DataType::Gender, "HKCharacteristicTypeIdentifierBiologicalSex", None),
    entry(DataType::DateOfBirth, "HKCharacteristicTypeIdentifierDateOfBirth", None),
];

const HEALTHKIT_COMPANIONS: &[(DataType, DataType)] = &[
    (DataType::Distance, DataType::DistanceCycling),
    (DataType::Calories, DataType::CaloriesBasal),
];

const HEALTHKIT_MEASUREMENT_FALLBACKS: &[(DataType, &str)] = &[
    (DataType::Weight, "readWeight"),
    (DataType::Height, "readHeight"),
];

const GOOGLE_FIT_ENTRIES: &[RegistryEntry] = &[
    entry(DataType::Steps, "com.google.step_count.delta", Some("count")),
    entry(DataType::Distance, "com.google.distance.delta", Some("m")),
    entry(DataType::Calories, "com.google.calories.expended", Some("kcal")),
    entry(DataType::CaloriesBasal, "com.google.calories.bmr", Some("kcal")),
    entry(DataType::Height, "com.google.height", Some("m")),
    entry(DataType::Weight, "com.google.weight", Some("kg")),
    entry(DataType::HeartRate, "com.google.heart_rate.bpm", Some("bpm")),
    entry(DataType::FatPercentage, "com.google.body.fat.percentage", Some("percent")),
    entry(DataType::Activity, "com.google.activity.segment", Some("activityType")),
];

const fn entry(
    data_type: DataType,
    native_id: &'static str,
    unit: Option<&'static str>,
) -> RegistryEntry {
    RegistryEntry {
        data_type,
        native_id,
        unit,
    }
}

/// Immutable lookup tables for one platform
#[derive(Debug, Clone)]
pub struct Registry {
    platform: Platform,
    entries: BTreeMap<DataType, RegistryEntry>,
    by_native: HashMap<&'static str, DataType>,
    companions: BTreeMap<DataType, DataType>,
    measurement_fallbacks: BTreeMap<DataType, &'static str>,
    sleep_analysis: Option<&'static str>,
}

impl Registry {
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::HealthKit => Self::build(
                platform,
                HEALTHKIT_ENTRIES,
                HEALTHKIT_COMPANIONS,
                HEALTHKIT_MEASUREMENT_FALLBACKS,
                Some("HKCategoryTypeIdentifierSleepAnalysis"),
            ),
            Platform::GoogleFit => Self::build(platform, GOOGLE_FIT_ENTRIES, &[], &[], None),
        }
    }

    fn build(
        platform: Platform,
        entries: &[RegistryEntry],
        companions: &[(DataType, DataType)],
        fallbacks: &[(DataType, &'static str)],
        sleep_analysis: Option<&'static str>,
    ) -> Self {
        Self {
            platform,
            entries: entries.iter().map(|e| (e.data_type, *e)).collect(),
            by_native: entries.iter().map(|e| (e.native_id, e.data_type)).collect(),
            companions: companions.iter().copied().collect(),
            measurement_fallbacks: fallbacks.iter().copied().collect(),
            sleep_analysis,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn entry(&self, data_type: DataType) -> Result<&RegistryEntry, HealthError> {
        self.entries
            .get(&data_type)
            .ok_or_else(|| HealthError::UnknownDataType(data_type.as_str().to_string()))
    }

    pub fn native_id_of(&self, data_type: DataType) -> Result<&'static str, HealthError> {
        self.entry(data_type).map(|e| e.native_id)
    }

    pub fn unit_of(&self, data_type: DataType) -> Option<&'static str> {
        self.entries.get(&data_type).and_then(|e| e.unit)
    }

    /// Reverse lookup from a native identifier
    pub fn data_type_of(&self, native_id: &str) -> Result<DataType, HealthError> {
        self.by_native
            .get(native_id)
            .copied()
            .ok_or_else(|| HealthError::UnknownDataType(native_id.to_string()))
    }

    /// Second component whose results are summed into `data_type`, if any
    pub fn companion_of(&self, data_type: DataType) -> Option<DataType> {
        self.companions.get(&data_type).copied()
    }

    /// Native profile reader consulted when a sample query comes back empty
    pub fn measurement_fallback(&self, data_type: DataType) -> Option<&'static str> {
        self.measurement_fallbacks.get(&data_type).copied()
    }

    pub fn sleep_analysis_id(&self) -> Option<&'static str> {
        self.sleep_analysis
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    pub fn contains(&self, data_type: DataType) -> bool {
        self.entries.contains_key(&data_type)
    }
}
