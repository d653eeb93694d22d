//! Request fan-out
//!
//! Every contacted replica produces exactly one event on the request's
//! [`AckState`]: a success, a failure, or a miss when it overran its deadline.
//! Calls that cannot even be queued count as failures right away.

use std::sync::Arc;
use std::time::Duration;

use crate::common::{Error, METRICS};
use crate::coordinator::pool::WorkerPool;
use crate::coordinator::quorum::AckState;
use crate::coordinator::replica::{
    unexpected_reply, LocalReplica, ReplicaRequest, ReplicaTransport,
};

pub struct Dispatcher {
    self_url: String,
    local: Arc<LocalReplica>,
    remote: Arc<dyn ReplicaTransport>,
    pool: Arc<WorkerPool>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        self_url: impl Into<String>,
        local: Arc<LocalReplica>,
        remote: Arc<dyn ReplicaTransport>,
        pool: Arc<WorkerPool>,
        timeout: Duration,
    ) -> Self {
        Self {
            self_url: self_url.into(),
            local,
            remote,
            pool,
            timeout,
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Send `request` to every node in `replicas`, reporting into `state`.
    pub fn fan_out(&self, state: &Arc<AckState>, replicas: &[String], request: ReplicaRequest) {
        let request = Arc::new(request);

        for target in replicas {
            let transport: Arc<dyn ReplicaTransport> = if *target == self.self_url {
                self.local.clone()
            } else {
                self.remote.clone()
            };

            let job = Box::pin(call_replica(
                transport,
                target.clone(),
                request.clone(),
                state.clone(),
                self.timeout,
            ));

            if let Err(e) = self.pool.try_submit(job) {
                tracing::warn!("Replica call to {} not dispatched: {}", target, e);
                METRICS.replica_failures.inc();
                state.on_failure();
            }
        }
    }
}

async fn call_replica(
    transport: Arc<dyn ReplicaTransport>,
    target: String,
    request: Arc<ReplicaRequest>,
    state: Arc<AckState>,
    timeout: Duration,
) {
    match tokio::time::timeout(timeout, transport.send(&target, &request)).await {
        Ok(Ok(reply)) if reply.acknowledges(request.method) => {
            METRICS.replica_success.inc();
            state.on_success(reply.timestamp, i32::from(reply.status), reply.body);
        }
        Ok(Ok(reply)) => {
            tracing::warn!(
                "Replica {} rejected {}: {}",
                target,
                request.key,
                unexpected_reply(request.method, &reply)
            );
            METRICS.replica_failures.inc();
            state.on_failure();
        }
        // The transport may enforce the same deadline and report it first.
        Ok(Err(Error::Timeout(_))) | Err(_) => {
            tracing::warn!(
                "Replica {} missed {} after {:?}",
                target,
                request.key,
                timeout
            );
            METRICS.replica_timeouts.inc();
            state.on_missed();
        }
        Ok(Err(e)) => {
            tracing::warn!("Replica {} failed {}: {}", target, request.key, e);
            METRICS.replica_failures.inc();
            state.on_failure();
        }
    }
}
