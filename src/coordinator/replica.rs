//! Replica transport
//!
//! A replica call is a request carrying method, key, write timestamp and body,
//! and a reply carrying status, the stored version's timestamp and body. Remote
//! replicas are reached over HTTP; the local node short-circuits to storage.

use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::common::{Error, Result, Storage};
use crate::coordinator::quorum::{Method, VersionedValue};

/// Internal endpoint served by every node
pub const REPLICA_ENDPOINT: &str = "/v0/replica/entity";

/// Header carrying the last-write-wins timestamp (milliseconds)
pub const TIMESTAMP_HEADER: &str = "x-timestamp";

/// One replica-level operation
#[derive(Debug, Clone)]
pub struct ReplicaRequest {
    pub method: Method,
    pub key: String,
    /// Write timestamp assigned by the coordinating node
    pub timestamp: i64,
    pub body: Bytes,
}

/// A replica's answer
#[derive(Debug, Clone)]
pub struct ReplicaReply {
    pub status: u16,
    /// Timestamp of the stored version, or -1 if there is none
    pub timestamp: i64,
    pub body: Bytes,
}

impl ReplicaReply {
    fn new(status: u16, timestamp: i64, body: Bytes) -> Self {
        Self {
            status,
            timestamp,
            body,
        }
    }

    /// Does this reply count towards the quorum of `method`?
    pub fn acknowledges(&self, method: Method) -> bool {
        match method {
            Method::Get => self.status == 200 || self.status == 404,
            Method::Put => self.status == 201,
            Method::Delete => self.status == 202,
        }
    }
}

/// Anything able to carry a [`ReplicaRequest`] to a node
pub trait ReplicaTransport: Send + Sync {
    fn send<'a>(
        &'a self,
        target: &'a str,
        request: &'a ReplicaRequest,
    ) -> BoxFuture<'a, Result<ReplicaReply>>;
}

/// On-disk record of an entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub timestamp: i64,
    pub tombstone: bool,
    pub value: Vec<u8>,
}

impl StoredEntry {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Serves replica requests straight from local storage
#[derive(Clone)]
pub struct LocalReplica {
    storage: Storage,
}

impl LocalReplica {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn apply(&self, request: &ReplicaRequest) -> Result<ReplicaReply> {
        match request.method {
            Method::Get => {
                let entry = match self.storage.get(&request.key)? {
                    Some(bytes) => StoredEntry::decode(&bytes)?,
                    None => {
                        return Ok(ReplicaReply::new(
                            404,
                            VersionedValue::SENTINEL_TIMESTAMP,
                            Bytes::new(),
                        ))
                    }
                };
                if entry.tombstone {
                    Ok(ReplicaReply::new(404, entry.timestamp, Bytes::new()))
                } else {
                    Ok(ReplicaReply::new(200, entry.timestamp, entry.value.into()))
                }
            }
            Method::Put => {
                self.write(request, false, request.body.to_vec())?;
                Ok(ReplicaReply::new(201, request.timestamp, Bytes::new()))
            }
            Method::Delete => {
                self.write(request, true, Vec::new())?;
                Ok(ReplicaReply::new(202, request.timestamp, Bytes::new()))
            }
        }
    }

    fn write(&self, request: &ReplicaRequest, tombstone: bool, value: Vec<u8>) -> Result<()> {
        let entry = StoredEntry {
            timestamp: request.timestamp,
            tombstone,
            value,
        };
        self.storage.put(&request.key, &entry.encode()?)
    }
}

impl ReplicaTransport for LocalReplica {
    fn send<'a>(
        &'a self,
        _target: &'a str,
        request: &'a ReplicaRequest,
    ) -> BoxFuture<'a, Result<ReplicaReply>> {
        Box::pin(async move { self.apply(request) })
    }
}

/// Reaches remote replicas through their internal HTTP endpoint
#[derive(Clone)]
pub struct HttpReplicaClient {
    client: reqwest::Client,
}

impl HttpReplicaClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    async fn call(&self, target: &str, request: &ReplicaRequest) -> Result<ReplicaReply> {
        let url = format!("{}{}", target.trim_end_matches('/'), REPLICA_ENDPOINT);
        let builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Put => self.client.put(&url).body(request.body.clone()),
            Method::Delete => self.client.delete(&url),
        };

        let response = builder
            .query(&[("id", request.key.as_str())])
            .header(TIMESTAMP_HEADER, request.timestamp)
            .send()
            .await?;

        let status = response.status().as_u16();
        let timestamp = response
            .headers()
            .get(TIMESTAMP_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(VersionedValue::SENTINEL_TIMESTAMP);
        let body = response.bytes().await?;

        Ok(ReplicaReply::new(status, timestamp, body))
    }
}

impl ReplicaTransport for HttpReplicaClient {
    fn send<'a>(
        &'a self,
        target: &'a str,
        request: &'a ReplicaRequest,
    ) -> BoxFuture<'a, Result<ReplicaReply>> {
        Box::pin(self.call(target, request))
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Error used when a reply cannot be interpreted
pub fn unexpected_reply(method: Method, reply: &ReplicaReply) -> Error {
    Error::Http(format!(
        "unexpected status {} for replica {}",
        reply.status, method
    ))
}
