//! Health Bridge - uniform access to native health data stores
//!
//! Health Bridge presents one query/store/aggregate interface over two divergent native health
//! stores (HealthKit-style and Google Fit-style). Requests use a platform-neutral vocabulary of
//! data types; the bridge translates them into native identifiers and units, invokes the native
//! store through an opaque call primitive, and normalizes the results back into one sample shape.
//!
//! ## Modules
//!
//! - **Registry / Activity**: static neutral ↔ native mapping tables, one per platform
//! - **Native**: the call adapter over the opaque bridge, plus a fixture-backed replay bridge
//! - **Composer**: composite, derived and bucketed queries
//! - **Bucketing**: calendar-aligned aggregation

pub mod activity;
pub mod bucketing;
pub mod client;
pub mod composer;
pub mod config;
pub mod error;
pub mod native;
pub mod registry;
pub mod types;

pub use activity::ActivityTranslator;
pub use client::HealthClient;
pub use config::HealthConfig;
pub use error::HealthError;
pub use native::{NativeBridge, ReplayBridge};
pub use registry::Registry;
pub use types::{
    Aggregated, BucketSize, DataType, Platform, Query, Sample, SampleValue, StoreRequest,
};

/// Bridge version reported by the CLI
pub const BRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");
