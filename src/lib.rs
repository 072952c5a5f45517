//! Causal loop analytics: feature extraction, pattern and predictive model
//! lifecycles, trend forecasting and feedback loop simulation over problem
//! records.

pub mod bundle;
pub mod config;
pub mod deserializers;
pub mod engines;
pub mod error;
pub mod events;
pub mod features;
pub mod http;
pub mod models;
pub mod schemas;
pub mod service;
pub mod store;
pub mod utils;
pub mod worker;

use std::sync::Arc;

use crate::bundle::BundleStore;
use crate::config::Config;
use crate::events::EventBus;
use crate::service::AnalyticsService;
use crate::store::{JsonFileStore, RecordStore};

/// Build a service over the configured JSON record file and models directory,
/// restoring any persisted bundles.
pub async fn build_service(config: &Config) -> Arc<AnalyticsService> {
    let store: Arc<dyn RecordStore> = Arc::new(JsonFileStore::new(&config.system.data_file));
    let service = Arc::new(AnalyticsService::new(
        store,
        EventBus::new(config.runtime.event_capacity),
        Some(BundleStore::new(&config.system.models_dir)),
        config.analytics.clone(),
    ));
    service.restore().await;
    service
}
