//! Cluster inspector
//!
//! One node (the host) polls every peer's statistics on a fixed period and
//! keeps a time-series per peer. Every other node redirects inspector queries
//! to the host. All nodes answer the info endpoint with their own statistics.

pub mod actual;
pub mod redirect;
pub mod sample;

use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::cluster::ShardRouter;
use crate::common::{timestamp_now_millis, Error, NodeConfig, Result};

pub use actual::ActualInspector;
pub use redirect::RedirectInspector;
pub use sample::InspectorSample;

/// Endpoint answering a node's current statistics
pub const INFO_ENDPOINT: &str = "/v0/inspector/info";

/// Live statistics of the local node
pub trait StatsSource: Send + Sync {
    fn key_count(&self) -> u64;
    fn task_count(&self) -> u64;
}

/// Query parameters of `/v0/inspector`, kept as raw strings so that
/// validation can report exactly what was wrong.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InspectorQuery {
    pub shard: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    /// Original query string, forwarded on redirect
    #[serde(skip)]
    pub raw: String,
}

pub trait InspectorService: Send + Sync {
    /// Answer a time-series query.
    fn handle_request(&self, query: &InspectorQuery) -> Response;

    /// Answer this node's current sample.
    fn handle_info_request(&self) -> Response;

    fn set_data(&self, source: Arc<dyn StatsSource>);

    fn start(&self);

    fn stop(&self);
}

/// Info endpoint shared by both inspector variants
#[derive(Default)]
pub(crate) struct InfoProvider {
    source: RwLock<Option<Arc<dyn StatsSource>>>,
}

impl InfoProvider {
    pub(crate) fn set(&self, source: Arc<dyn StatsSource>) {
        if let Ok(mut slot) = self.source.write() {
            *slot = Some(source);
        }
    }

    pub(crate) fn sample(&self) -> Option<InspectorSample> {
        let source = self.source.read().ok()?.clone()?;
        Some(InspectorSample::new(
            timestamp_now_millis(),
            source.key_count(),
            source.task_count(),
        ))
    }

    pub(crate) fn response(&self) -> Response {
        match self.sample() {
            Some(sample) => (StatusCode::OK, sample.encode()).into_response(),
            None => (StatusCode::SERVICE_UNAVAILABLE, "No statistics yet").into_response(),
        }
    }
}

/// Pick the inspector variant for this node.
pub fn build(config: &NodeConfig, router: Arc<ShardRouter>) -> Result<Arc<dyn InspectorService>> {
    let host = config
        .inspector_host()
        .ok_or_else(|| Error::InvalidConfig("no inspector host in an empty cluster".into()))?;

    if host == config.self_url {
        tracing::info!("Hosting the cluster inspector");
        Ok(Arc::new(ActualInspector::open(config, router)?))
    } else {
        tracing::info!("Inspector queries redirect to {}", host);
        Ok(Arc::new(RedirectInspector::new(host)))
    }
}
