//! Bridge configuration

use crate::error::HealthError;
use crate::types::{Platform, StraddlePolicy};
use chrono::{Duration, FixedOffset};
use serde::{Deserialize, Serialize};

/// Default lookback used to estimate a basal rate when the query range has no basal samples
pub const DEFAULT_BASAL_LOOKBACK_DAYS: u32 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Native store family the bridge talks to
    pub platform: Platform,
    /// Offset of the user's local calendar from UTC, in minutes
    pub utc_offset_minutes: i32,
    /// Fallback window for basal rate estimation, in days
    pub basal_lookback_days: u32,
    /// Handling of samples crossing a bucket boundary
    pub straddle_policy: StraddlePolicy,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            platform: Platform::HealthKit,
            utc_offset_minutes: 0,
            basal_lookback_days: DEFAULT_BASAL_LOOKBACK_DAYS,
            straddle_policy: StraddlePolicy::Drop,
        }
    }
}

impl HealthConfig {
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            platform,
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self, HealthError> {
        Self::from_env_with(|k| std::env::var(k).ok())
    }

    /// Reads configuration through `get` so tests never touch the process environment.
    pub fn from_env_with<F>(mut get: F) -> Result<Self, HealthError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(platform) = get("HEALTH_BRIDGE_PLATFORM") {
            config.platform = platform.parse()?;
        }
        if let Some(offset) = get("HEALTH_BRIDGE_UTC_OFFSET_MINUTES") {
            config.utc_offset_minutes = offset.trim().parse().map_err(|_| {
                HealthError::Config(format!("HEALTH_BRIDGE_UTC_OFFSET_MINUTES invalid: {offset}"))
            })?;
        }
        if let Some(days) = get("HEALTH_BRIDGE_BASAL_LOOKBACK_DAYS") {
            config.basal_lookback_days = days.trim().parse().map_err(|_| {
                HealthError::Config(format!("HEALTH_BRIDGE_BASAL_LOOKBACK_DAYS invalid: {days}"))
            })?;
        }
        if let Some(policy) = get("HEALTH_BRIDGE_STRADDLE_POLICY") {
            config.straddle_policy = policy.parse()?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, HealthError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HealthError> {
        self.utc_offset()?;
        if self.basal_lookback_days == 0 {
            return Err(HealthError::Config(
                "basal_lookback_days must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, HealthError> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            HealthError::Config(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }

    pub fn basal_lookback(&self) -> Duration {
        Duration::days(i64::from(self.basal_lookback_days))
    }
}
