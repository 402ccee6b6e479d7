//! Application-facing entry point
//!
//! `HealthClient` wires the per-platform registry, activity translator and native adapter into a
//! composer and exposes the five neutral operations. Every call runs inside a tracing span with
//! a fresh request id, so all native calls issued for one composite query can be correlated.

use crate::activity::ActivityTranslator;
use crate::composer::QueryComposer;
use crate::config::HealthConfig;
use crate::error::HealthError;
use crate::native::{NativeBridge, NativeCallAdapter};
use crate::registry::Registry;
use crate::types::{Aggregated, Platform, Query, Sample, StoreRequest};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct HealthClient {
    platform: Platform,
    composer: QueryComposer,
    registry: Arc<Registry>,
    activities: Arc<ActivityTranslator>,
}

impl HealthClient {
    pub fn new(bridge: Arc<dyn NativeBridge>, config: HealthConfig) -> Result<Self, HealthError> {
        config.validate()?;
        let registry = Arc::new(Registry::for_platform(config.platform));
        let activities = Arc::new(ActivityTranslator::for_platform(config.platform));
        let native = NativeCallAdapter::new(bridge, config.platform, config.utc_offset()?);
        let composer =
            QueryComposer::new(native, Arc::clone(&registry), Arc::clone(&activities), &config)?;
        Ok(Self {
            platform: config.platform,
            composer,
            registry,
            activities,
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn activities(&self) -> &ActivityTranslator {
        &self.activities
    }

    fn span(&self, operation: &'static str) -> tracing::Span {
        tracing::info_span!(
            "health_request",
            request_id = %Uuid::new_v4(),
            operation,
            platform = self.platform.as_str()
        )
    }

    pub async fn is_available(&self) -> Result<bool, HealthError> {
        self.composer
            .is_available()
            .instrument(self.span("is_available"))
            .await
    }

    pub async fn request_authorization<S: AsRef<str> + Sync>(
        &self,
        data_types: &[S],
    ) -> Result<(), HealthError> {
        self.composer
            .request_authorization(data_types)
            .instrument(self.span("request_authorization"))
            .await
    }

    pub async fn query(&self, query: &Query) -> Result<Vec<Sample>, HealthError> {
        self.composer
            .query(query)
            .instrument(self.span("query"))
            .await
    }

    pub async fn query_aggregated(&self, query: &Query) -> Result<Aggregated, HealthError> {
        self.composer
            .query_aggregated(query)
            .instrument(self.span("query_aggregated"))
            .await
    }

    pub async fn store(&self, request: &StoreRequest) -> Result<(), HealthError> {
        self.composer
            .store(request)
            .instrument(self.span("store"))
            .await
    }
}
