//! HTTP API of a shardkv node
//!
//! Client endpoints:
//! - `GET|PUT|DELETE /v0/entity?id=&ack=&from=` coordinated over replicas
//! - `GET /v0/entities?start=&end=` local range scan
//! - `GET /v0/inspector?shard=&from=&to=` cluster inspector
//!
//! Internal endpoints:
//! - `GET|PUT|DELETE /v0/replica/entity?id=` single replica operation
//! - `GET /v0/inspector/info` this node's current statistics

use std::sync::Arc;

use async_stream::stream;
use axum::{
    body::{Body, Bytes},
    extract::{Query, RawQuery, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::cluster::ShardRouter;
use crate::common::{timestamp_now_millis, Error, Result, Storage, METRICS};
use crate::coordinator::dispatch::Dispatcher;
use crate::coordinator::quorum::{AckState, Method, QuorumOutcome};
use crate::coordinator::replica::{
    LocalReplica, ReplicaRequest, StoredEntry, REPLICA_ENDPOINT, TIMESTAMP_HEADER,
};
use crate::inspector::{InspectorQuery, InspectorService, INFO_ENDPOINT};

pub const ENTITY_ENDPOINT: &str = "/v0/entity";
pub const ENTITIES_ENDPOINT: &str = "/v0/entities";
pub const STATUS_ENDPOINT: &str = "/v0/status";
pub const INSPECTOR_ENDPOINT: &str = "/v0/inspector";

/// Shared node state for HTTP handlers.
#[derive(Clone)]
pub struct NodeState {
    pub router: Arc<ShardRouter>,
    pub dispatcher: Arc<Dispatcher>,
    pub local: Arc<LocalReplica>,
    pub inspector: Arc<dyn InspectorService>,
}

/// Creates the HTTP router with all endpoints.
pub fn create_router(state: NodeState) -> Router {
    Router::new()
        .route(
            ENTITY_ENDPOINT,
            get(get_entity).put(put_entity).delete(delete_entity),
        )
        .route(
            REPLICA_ENDPOINT,
            get(replica_entity)
                .put(replica_entity)
                .delete(replica_entity),
        )
        .route(ENTITIES_ENDPOINT, get(entities))
        .route(STATUS_ENDPOINT, get(status))
        .route(INSPECTOR_ENDPOINT, get(inspector))
        .route(INFO_ENDPOINT, get(inspector_info))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct EntityParams {
    pub id: Option<String>,
    pub ack: Option<usize>,
    pub from: Option<usize>,
}

impl EntityParams {
    /// Validate against the cluster size and fill in the default quorum:
    /// `from` = every node, `ack` = a majority of `from`.
    pub fn resolve(self, cluster_size: usize) -> Result<(String, usize, usize)> {
        let id = match self.id {
            Some(id) if !id.is_empty() => id,
            _ => return Err(Error::BadRequest("Missing id".into())),
        };

        let from = self.from.unwrap_or(cluster_size);
        let ack = self.ack.unwrap_or(from / 2 + 1);

        if from == 0 || from > cluster_size {
            return Err(Error::BadRequest(format!(
                "from must be within 1..={}",
                cluster_size
            )));
        }
        if ack == 0 || ack > from {
            return Err(Error::BadRequest(format!(
                "ack must be within 1..={}",
                from
            )));
        }

        Ok((id, ack, from))
    }
}

fn error_response(e: Error) -> Response {
    (e.to_http_status(), e.to_string()).into_response()
}

/// Map a finalized quorum onto the client response.
pub fn outcome_response(outcome: &QuorumOutcome) -> Response {
    if !outcome.success {
        return (StatusCode::GATEWAY_TIMEOUT, "Not Enough Replicas").into_response();
    }
    match outcome.method {
        Method::Get => match &outcome.best {
            Some(best) if best.status == i32::from(StatusCode::OK.as_u16()) => {
                (StatusCode::OK, best.payload.clone()).into_response()
            }
            _ => (StatusCode::NOT_FOUND, "Not Found").into_response(),
        },
        Method::Put => (StatusCode::CREATED, "Created").into_response(),
        Method::Delete => (StatusCode::ACCEPTED, "Accepted").into_response(),
    }
}

/// Route, fan out and wait for the quorum decision.
async fn coordinate(
    state: &NodeState,
    method: Method,
    params: EntityParams,
    body: Bytes,
) -> Response {
    METRICS.record_request(method);

    let (key, ack, from) = match params.resolve(state.router.cluster_size()) {
        Ok(resolved) => resolved,
        Err(e) => return error_response(e),
    };

    let shard = state.router.shard_for_key(&key);
    let replicas = match state.router.replicas(shard, from) {
        Ok(replicas) => replicas,
        Err(e) => return error_response(e),
    };

    let (ack_state, outcome) = match AckState::with_channel(method, ack, from) {
        Ok(created) => created,
        Err(e) => return error_response(e),
    };

    let timestamp = match method {
        Method::Get => 0,
        Method::Put | Method::Delete => timestamp_now_millis(),
    };

    tracing::debug!(
        "{} {} -> shard {} (ack={}, from={})",
        method,
        key,
        shard,
        ack,
        from
    );

    state.dispatcher.fan_out(
        &Arc::new(ack_state),
        replicas,
        ReplicaRequest {
            method,
            key,
            timestamp,
            body,
        },
    );

    match outcome.await {
        Ok(outcome) => outcome_response(&outcome),
        // Every replica job was dropped before finalizing (node shutting down).
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "Request abandoned").into_response(),
    }
}

async fn get_entity(
    State(state): State<NodeState>,
    Query(params): Query<EntityParams>,
) -> Response {
    coordinate(&state, Method::Get, params, Bytes::new()).await
}

async fn put_entity(
    State(state): State<NodeState>,
    Query(params): Query<EntityParams>,
    body: Bytes,
) -> Response {
    coordinate(&state, Method::Put, params, body).await
}

async fn delete_entity(
    State(state): State<NodeState>,
    Query(params): Query<EntityParams>,
) -> Response {
    coordinate(&state, Method::Delete, params, Bytes::new()).await
}

#[derive(Debug, Deserialize)]
struct ReplicaParams {
    id: String,
}

/// Apply one replica operation to local storage.
async fn replica_entity(
    State(state): State<NodeState>,
    http_method: axum::http::Method,
    Query(params): Query<ReplicaParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let method = match http_method {
        axum::http::Method::GET => Method::Get,
        axum::http::Method::PUT => Method::Put,
        axum::http::Method::DELETE => Method::Delete,
        _ => return StatusCode::METHOD_NOT_ALLOWED.into_response(),
    };

    let timestamp = headers
        .get(TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i64>().ok());
    let timestamp = match (method, timestamp) {
        (Method::Get, _) => 0,
        (_, Some(timestamp)) => timestamp,
        (_, None) => {
            return error_response(Error::BadRequest(format!(
                "{} requires the {} header",
                method, TIMESTAMP_HEADER
            )))
        }
    };

    let request = ReplicaRequest {
        method,
        key: params.id,
        timestamp,
        body,
    };

    match state.local.apply(&request) {
        Ok(reply) => {
            let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::OK);
            (status, [(TIMESTAMP_HEADER, reply.timestamp.to_string())], reply.body)
                .into_response()
        }
        Err(e) => {
            tracing::error!("Local {} of {} failed: {}", method, request.key, e);
            error_response(e)
        }
    }
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    start: Option<String>,
    end: Option<String>,
}

/// Entries read from storage per batch of a range scan
const SCAN_BATCH: usize = 256;

/// Stream live local entities in `[start, end)` as `key\nvalue\n` records.
async fn entities(
    State(state): State<NodeState>,
    Query(params): Query<RangeParams>,
) -> Response {
    let start = match params.start {
        Some(start) if !start.is_empty() => start,
        _ => return error_response(Error::BadRequest("Missing start".into())),
    };
    let end = params.end;
    let storage = state.local.storage().clone();

    let body = stream! {
        let mut cursor = start;
        let mut after_cursor = false;
        loop {
            let batch = match scan_batch(&storage, &cursor, after_cursor, end.as_deref()) {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!("Range scan from {} failed: {}", cursor, e);
                    yield Err(std::io::Error::other(e.to_string()));
                    break;
                }
            };
            let exhausted = batch.len() < SCAN_BATCH;
            if let Some((last, _)) = batch.last() {
                cursor = last.clone();
                after_cursor = true;
            }

            for (key, raw) in batch {
                match StoredEntry::decode(&raw) {
                    Ok(entry) if !entry.tombstone => {
                        let mut record = Vec::with_capacity(key.len() + entry.value.len() + 2);
                        record.extend_from_slice(key.as_bytes());
                        record.push(b'\n');
                        record.extend_from_slice(&entry.value);
                        record.push(b'\n');
                        yield Ok::<_, std::io::Error>(Bytes::from(record));
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Skipping undecodable entity {}: {}", key, e),
                }
            }

            if exhausted {
                break;
            }
        }
    };

    (StatusCode::OK, Body::from_stream(body)).into_response()
}

/// Next batch of raw entries at or after `cursor` (strictly after when
/// `after_cursor`). The storage iterator never outlives the call.
fn scan_batch(
    storage: &Storage,
    cursor: &str,
    after_cursor: bool,
    end: Option<&str>,
) -> Result<Vec<(String, Vec<u8>)>> {
    let mut batch = Vec::with_capacity(SCAN_BATCH);
    for item in storage.range(cursor, end)? {
        let (key, raw) = item?;
        if after_cursor && key == cursor {
            continue;
        }
        batch.push((key, raw));
        if batch.len() == SCAN_BATCH {
            break;
        }
    }
    Ok(batch)
}

async fn status() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn metrics(State(state): State<NodeState>) -> impl IntoResponse {
    // Workers drain the queue without touching the gauge.
    METRICS
        .queued_tasks
        .set(state.dispatcher.pool().queued() as u64);
    (StatusCode::OK, METRICS.to_prometheus())
}

async fn inspector_info(State(state): State<NodeState>) -> Response {
    state.inspector.handle_info_request()
}

async fn inspector(
    State(state): State<NodeState>,
    Query(mut query): Query<InspectorQuery>,
    RawQuery(raw): RawQuery,
) -> Response {
    query.raw = raw.unwrap_or_default();
    state.inspector.handle_request(&query)
}
