//! Activity-type translation
//!
//! Maps the neutral activity vocabulary (dotted hierarchical names such as `biking.road`) to a
//! native activity vocabulary and back.
//!
//! Encoding is total: activities the native store cannot represent, and any label the
//! vocabulary does not know, become the native "other" value. Decoding is lossy because several
//! neutral activities share one native value; the neutral representative returned for such a
//! value is chosen by a fixed rule rather than table order:
//!
//! 1. a name without a `.` sub-type wins over dotted names,
//! 2. then the shortest name,
//! 3. then the lexicographically smallest name.
//!
//! The native "other" value always decodes to `other`.

use crate::error::HealthError;
use crate::types::Platform;
use std::collections::{BTreeSet, HashMap, HashSet};

pub const NEUTRAL_OTHER: &str = "other";

const HEALTHKIT_OTHER: &str = "HKWorkoutActivityTypeOther";
const GOOGLE_FIT_OTHER: &str = "other";

const HEALTHKIT_ACTIVITIES: &[(&str, &str)] = &[
    ("archery", "HKWorkoutActivityTypeArchery"),
    ("badminton", "HKWorkoutActivityTypeBadminton"),
    ("baseball", "HKWorkoutActivityTypeBaseball"),
    ("basketball", "HKWorkoutActivityTypeBasketball"),
    ("biking", "HKWorkoutActivityTypeCycling"),
    ("biking.hand", "HKWorkoutActivityTypeCycling"),
    ("biking.mountain", "HKWorkoutActivityTypeCycling"),
    ("biking.road", "HKWorkoutActivityTypeCycling"),
    ("biking.spinning", "HKWorkoutActivityTypeCycling"),
    ("biking.stationary", "HKWorkoutActivityTypeCycling"),
    ("biking.utility", "HKWorkoutActivityTypeCycling"),
    ("bowling", "HKWorkoutActivityTypeBowling"),
    ("cricket", "HKWorkoutActivityTypeCricket"),
    ("crossfit", "HKWorkoutActivityTypeCrossTraining"),
    ("curling", "HKWorkoutActivityTypeCurling"),
    ("dancing", "HKWorkoutActivityTypeDance"),
    ("dance_inspired", "HKWorkoutActivityTypeDanceInspiredTraining"),
    ("elliptical", "HKWorkoutActivityTypeElliptical"),
    ("fencing", "HKWorkoutActivityTypeFencing"),
    ("fishing", "HKWorkoutActivityTypeFishing"),
    ("football.american", "HKWorkoutActivityTypeAmericanFootball"),
    ("football.australian", "HKWorkoutActivityTypeAustralianFootball"),
    ("football.soccer", "HKWorkoutActivityTypeSoccer"),
    ("functional_strength", "HKWorkoutActivityTypeFunctionalStrengthTraining"),
    ("golf", "HKWorkoutActivityTypeGolf"),
    ("gymnastics", "HKWorkoutActivityTypeGymnastics"),
    ("handball", "HKWorkoutActivityTypeHandball"),
    ("hiking", "HKWorkoutActivityTypeHiking"),
    ("hockey", "HKWorkoutActivityTypeHockey"),
    ("horseback_riding", "HKWorkoutActivityTypeEquestrianSports"),
    ("hunting", "HKWorkoutActivityTypeHunting"),
    ("lacrosse", "HKWorkoutActivityTypeLacrosse"),
    ("martial_arts", "HKWorkoutActivityTypeMartialArts"),
    ("martial_arts.mixed", "HKWorkoutActivityTypeMartialArts"),
    ("meditation", "HKWorkoutActivityTypeMindAndBody"),
    ("mixed_metabolic_cardio", "HKWorkoutActivityTypeMixedMetabolicCardioTraining"),
    ("paddle_sports", "HKWorkoutActivityTypePaddleSports"),
    ("play", "HKWorkoutActivityTypePlay"),
    ("preparation_and_recovery", "HKWorkoutActivityTypePreparationAndRecovery"),
    ("racquetball", "HKWorkoutActivityTypeRacquetball"),
    ("rock_climbing", "HKWorkoutActivityTypeClimbing"),
    ("rowing", "HKWorkoutActivityTypeRowing"),
    ("rowing.machine", "HKWorkoutActivityTypeRowing"),
    ("rugby", "HKWorkoutActivityTypeRugby"),
    ("running", "HKWorkoutActivityTypeRunning"),
    ("running.jogging", "HKWorkoutActivityTypeRunning"),
    ("running.sand", "HKWorkoutActivityTypeRunning"),
    ("running.treadmill", "HKWorkoutActivityTypeRunning"),
    ("sailing", "HKWorkoutActivityTypeSailing"),
    ("skating", "HKWorkoutActivityTypeSkatingSports"),
    ("skating.cross", "HKWorkoutActivityTypeSkatingSports"),
    ("skating.indoor", "HKWorkoutActivityTypeSkatingSports"),
    ("skating.inline", "HKWorkoutActivityTypeSkatingSports"),
    ("skiing", "HKWorkoutActivityTypeSnowSports"),
    ("skiing.back_country", "HKWorkoutActivityTypeSnowSports"),
    ("skiing.cross_country", "HKWorkoutActivityTypeSnowSports"),
    ("skiing.downhill", "HKWorkoutActivityTypeSnowSports"),
    ("skiing.kite", "HKWorkoutActivityTypeSnowSports"),
    ("skiing.roller", "HKWorkoutActivityTypeSnowSports"),
    ("sledding", "HKWorkoutActivityTypeSnowSports"),
    ("snowboarding", "HKWorkoutActivityTypeSnowSports"),
    ("snowmobile", "HKWorkoutActivityTypeSnowSports"),
    ("snowshoeing", "HKWorkoutActivityTypeSnowSports"),
    ("snow_sports", "HKWorkoutActivityTypeSnowSports"),
    ("softball", "HKWorkoutActivityTypeSoftball"),
    ("squash", "HKWorkoutActivityTypeSquash"),
    ("stair_climbing", "HKWorkoutActivityTypeStairClimbing"),
    ("stair_climbing.machine", "HKWorkoutActivityTypeStairClimbing"),
    ("standup_paddleboarding", "HKWorkoutActivityTypePaddleSports"),
    ("strength_training", "HKWorkoutActivityTypeTraditionalStrengthTraining"),
    ("surfing", "HKWorkoutActivityTypeSurfingSports"),
    ("swimming", "HKWorkoutActivityTypeSwimming"),
    ("swimming.open_water", "HKWorkoutActivityTypeSwimming"),
    ("swimming.pool", "HKWorkoutActivityTypeSwimming"),
    ("table_tennis", "HKWorkoutActivityTypeTableTennis"),
    ("tennis", "HKWorkoutActivityTypeTennis"),
    ("track_and_field", "HKWorkoutActivityTypeTrackAndField"),
    ("volleyball", "HKWorkoutActivityTypeVolleyball"),
    ("volleyball.beach", "HKWorkoutActivityTypeVolleyball"),
    ("volleyball.indoor", "HKWorkoutActivityTypeVolleyball"),
    ("walking", "HKWorkoutActivityTypeWalking"),
    ("walking.fitness", "HKWorkoutActivityTypeWalking"),
    ("walking.nordic", "HKWorkoutActivityTypeWalking"),
    ("walking.stroller", "HKWorkoutActivityTypeWalking"),
    ("walking.treadmill", "HKWorkoutActivityTypeWalking"),
    ("water_fitness", "HKWorkoutActivityTypeWaterFitness"),
    ("water_polo", "HKWorkoutActivityTypeWaterPolo"),
    ("water_sports", "HKWorkoutActivityTypeWaterSports"),
    ("wrestling", "HKWorkoutActivityTypeWrestling"),
    ("yoga", "HKWorkoutActivityTypeYoga"),
];

/// Neutral activities HealthKit has no workout type for
const HEALTHKIT_UNSUPPORTED: &[&str] = &[
    "aerobics",
    "biathlon",
    "boxing",
    "calisthenics",
    "circuit_training",
    "diving",
    "elevator",
    "ergometer",
    "escalator",
    "frisbee_disc",
    "gardening",
    "housework",
    "ice_skating",
    "in_vehicle",
    "interval_training",
    "interval_training.high_intensity",
    "jump_rope",
    "kayaking",
    "kettlebell_training",
    "kick_scooter",
    "kickboxing",
    "kitesurfing",
    "on_foot",
    "other",
    "p90x",
    "paragliding",
    "pilates",
    "polo",
    "scuba_diving",
    "skateboarding",
    "sleep",
    "sleep.awake",
    "sleep.deep",
    "sleep.light",
    "sleep.rem",
    "still",
    "team_sports",
    "tilting",
    "treadmill",
    "unknown",
    "wakeboarding",
    "weightlifting",
    "wheelchair",
    "windsurfing",
    "zumba",
];

/// Bidirectional activity mapping for one platform
#[derive(Debug, Clone)]
pub struct ActivityTranslator {
    to_native: HashMap<&'static str, &'static str>,
    from_native: HashMap<&'static str, &'static str>,
    unsupported: HashSet<&'static str>,
    other: &'static str,
}

impl ActivityTranslator {
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::HealthKit => {
                Self::build(HEALTHKIT_ACTIVITIES, HEALTHKIT_UNSUPPORTED, HEALTHKIT_OTHER)
            }
            Platform::GoogleFit => {
                // Fit activity names are the neutral vocabulary itself
                let identity: Vec<(&'static str, &'static str)> =
                    neutral_vocabulary().map(|name| (name, name)).collect();
                Self::build(&identity, &[], GOOGLE_FIT_OTHER)
            }
        }
    }

    fn build(
        supported: &[(&'static str, &'static str)],
        unsupported: &[&'static str],
        other: &'static str,
    ) -> Self {
        let mut to_native: HashMap<&'static str, &'static str> =
            supported.iter().copied().collect();
        for &name in unsupported {
            to_native.insert(name, other);
        }

        let mut from_native: HashMap<&'static str, &'static str> = HashMap::new();
        for &(neutral, native) in supported {
            if native == other {
                continue;
            }
            from_native
                .entry(native)
                .and_modify(|current| {
                    if representative_order(neutral, *current).is_lt() {
                        *current = neutral;
                    }
                })
                .or_insert(neutral);
        }
        from_native.insert(other, NEUTRAL_OTHER);

        Self {
            to_native,
            from_native,
            unsupported: unsupported.iter().copied().collect(),
            other,
        }
    }

    /// Native value of the catch-all "other" activity
    pub fn native_other(&self) -> &'static str {
        self.other
    }

    /// Total translation: unknown and unsupported activities become native "other"
    pub fn to_native(&self, neutral: &str) -> &'static str {
        match self.to_native.get(neutral) {
            Some(native) => native,
            None => {
                tracing::warn!(activity = neutral, "unrecognized activity, using other");
                self.other
            }
        }
    }

    /// Like [`to_native`](Self::to_native), but labels outside the vocabulary are an error
    pub fn to_native_strict(&self, neutral: &str) -> Result<&'static str, HealthError> {
        self.to_native
            .get(neutral)
            .copied()
            .ok_or_else(|| HealthError::UnknownActivity(neutral.to_string()))
    }

    /// Best-effort inverse; see the module docs for the representative rule
    pub fn from_native(&self, native: &str) -> &'static str {
        self.from_native.get(native).copied().unwrap_or_else(|| {
            tracing::debug!(activity = native, "unmapped native activity, using other");
            NEUTRAL_OTHER
        })
    }

    pub fn is_unsupported(&self, neutral: &str) -> bool {
        self.unsupported.contains(neutral)
    }
}

/// Every neutral activity name, sorted
pub fn neutral_vocabulary() -> impl Iterator<Item = &'static str> {
    HEALTHKIT_ACTIVITIES
        .iter()
        .map(|(neutral, _)| *neutral)
        .chain(HEALTHKIT_UNSUPPORTED.iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
}

fn representative_order(a: &str, b: &str) -> std::cmp::Ordering {
    (a.contains('.'), a.len(), a).cmp(&(b.contains('.'), b.len(), b))
}
