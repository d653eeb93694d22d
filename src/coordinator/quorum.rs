//! Quorum coordination for a single fanned-out request
//!
//! An [`AckState`] receives exactly one event per contacted replica, from any
//! thread and in any order, and fires its terminal callback exactly once:
//! as soon as `ack` replicas succeeded, or once all `from` replicas answered.
//!
//! Nothing here blocks. Counters are atomics, the terminal action is claimed
//! with a single compare-and-swap, and the best GET version is tracked by a
//! CAS retry loop over an index into write-once per-event slots.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::common::{Error, Result, METRICS};

/// Client-visible operation of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    Put,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Put => write!(f, "PUT"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// A replica's answer to a read, ordered by `timestamp` (last write wins)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    pub status: i32,
    pub timestamp: i64,
    pub payload: Bytes,
}

impl VersionedValue {
    pub const SENTINEL_STATUS: i32 = -1;
    pub const SENTINEL_TIMESTAMP: i64 = -1;

    /// Placeholder held until a replica reports a real version
    pub fn sentinel() -> Self {
        Self {
            status: Self::SENTINEL_STATUS,
            timestamp: Self::SENTINEL_TIMESTAMP,
            payload: Bytes::new(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.status == Self::SENTINEL_STATUS && self.timestamp == Self::SENTINEL_TIMESTAMP
    }
}

/// Terminal result of a request, delivered once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumOutcome {
    pub method: Method,
    /// At least `ack` replicas succeeded
    pub success: bool,
    /// Freshest version seen before finalize; `None` unless `method` is GET
    pub best: Option<VersionedValue>,
    /// Counter values observed at finalize
    pub acknowledged: usize,
    pub answered: usize,
}

type FinalizeFn = Box<dyn Fn(&QuorumOutcome) + Send + Sync>;

/// Per-request acknowledgment aggregator
pub struct AckState {
    method: Method,
    ack: usize,
    from: usize,

    /// Tickets handed out to incoming events, capped at `from`
    events: AtomicUsize,
    acknowledged: AtomicUsize,
    answered: AtomicUsize,

    /// One slot per event ticket (GET only)
    versions: Box<[OnceLock<VersionedValue>]>,
    /// 1-based index of the best slot in `versions`; 0 means the sentinel
    best: AtomicUsize,

    finalized: AtomicBool,
    outcome: OnceLock<QuorumOutcome>,
    on_finalize: FinalizeFn,
}

impl std::fmt::Debug for AckState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckState")
            .field("method", &self.method)
            .field("ack", &self.ack)
            .field("from", &self.from)
            .field("acknowledged", &self.acknowledged())
            .field("answered", &self.answered())
            .field("finalized", &self.is_finalized())
            .finish_non_exhaustive()
    }
}

impl AckState {
    /// Create the aggregator for one request. `on_finalize` runs exactly once,
    /// on whichever thread delivers the deciding event.
    pub fn new<F>(method: Method, ack: usize, from: usize, on_finalize: F) -> Result<Self>
    where
        F: Fn(&QuorumOutcome) + Send + Sync + 'static,
    {
        if ack == 0 || ack > from {
            return Err(Error::InvalidQuorum { ack, from });
        }

        let slots = if method == Method::Get { from } else { 0 };
        let versions = (0..slots).map(|_| OnceLock::new()).collect();

        Ok(Self {
            method,
            ack,
            from,
            events: AtomicUsize::new(0),
            acknowledged: AtomicUsize::new(0),
            answered: AtomicUsize::new(0),
            versions,
            best: AtomicUsize::new(0),
            finalized: AtomicBool::new(false),
            outcome: OnceLock::new(),
            on_finalize: Box::new(on_finalize),
        })
    }

    /// Create the aggregator with the outcome delivered through a oneshot channel.
    pub fn with_channel(
        method: Method,
        ack: usize,
        from: usize,
    ) -> Result<(Self, oneshot::Receiver<QuorumOutcome>)> {
        let (tx, rx) = oneshot::channel();
        // Only the finalize winner ever takes this lock.
        let tx = Mutex::new(Some(tx));
        let state = Self::new(method, ack, from, move |outcome| {
            let sender = tx.lock().ok().and_then(|mut slot| slot.take());
            if let Some(sender) = sender {
                // The requester may have gone away; nothing to deliver to then.
                let _ = sender.send(outcome.clone());
            }
        })?;
        Ok((state, rx))
    }

    /// Record a successful replica reply.
    pub fn on_success(&self, timestamp: i64, status: i32, payload: impl Into<Bytes>) {
        let Some(ticket) = self.claim_ticket() else {
            return;
        };

        if self.method == Method::Get {
            self.offer_version(
                ticket,
                VersionedValue {
                    status,
                    timestamp,
                    payload: payload.into(),
                },
            );
        }

        let acknowledged = self.acknowledged.fetch_add(1, Ordering::SeqCst) + 1;
        self.answer(acknowledged);
    }

    /// Record a replica that answered with an error.
    pub fn on_failure(&self) {
        if self.claim_ticket().is_some() {
            self.answer(self.acknowledged.load(Ordering::SeqCst));
        }
    }

    /// Record a replica that did not answer in time.
    pub fn on_missed(&self) {
        self.on_failure();
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn ack(&self) -> usize {
        self.ack
    }

    pub fn from(&self) -> usize {
        self.from
    }

    pub fn acknowledged(&self) -> usize {
        self.acknowledged.load(Ordering::SeqCst)
    }

    pub fn answered(&self) -> usize {
        self.answered.load(Ordering::SeqCst)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    /// The delivered outcome, once finalized. Later events never change it.
    pub fn outcome(&self) -> Option<&QuorumOutcome> {
        self.outcome.get()
    }

    /// Freshest version recorded so far (the sentinel if none).
    pub fn best_version(&self) -> VersionedValue {
        match self.best.load(Ordering::SeqCst) {
            0 => VersionedValue::sentinel(),
            index => self.versions[index - 1]
                .get()
                .cloned()
                .unwrap_or_else(VersionedValue::sentinel),
        }
    }

    fn claim_ticket(&self) -> Option<usize> {
        match self
            .events
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.from).then_some(n + 1)
            }) {
            Ok(ticket) => Some(ticket),
            Err(_) => {
                METRICS.excess_events.inc();
                tracing::warn!(
                    "{} request received more than {} replica events, ignoring",
                    self.method,
                    self.from
                );
                None
            }
        }
    }

    fn timestamp_at(&self, index: usize) -> i64 {
        match index {
            0 => VersionedValue::SENTINEL_TIMESTAMP,
            index => self.versions[index - 1]
                .get()
                .map_or(VersionedValue::SENTINEL_TIMESTAMP, |v| v.timestamp),
        }
    }

    fn offer_version(&self, ticket: usize, version: VersionedValue) {
        let timestamp = version.timestamp;
        // Tickets are unique, so each slot is written by exactly one event.
        let _ = self.versions[ticket].set(version);

        let candidate = ticket + 1;
        let mut current = self.best.load(Ordering::SeqCst);
        while self.timestamp_at(current) < timestamp {
            match self.best.compare_exchange(
                current,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    fn answer(&self, acknowledged: usize) {
        let answered = self.answered.fetch_add(1, Ordering::SeqCst) + 1;

        if self.is_finalized() {
            METRICS.late_events.inc();
            return;
        }

        if (acknowledged >= self.ack || answered == self.from)
            && self
                .finalized
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.finalize();
        }
    }

    fn finalize(&self) {
        let acknowledged = self.acknowledged();
        let success = acknowledged >= self.ack;
        let outcome = QuorumOutcome {
            method: self.method,
            success,
            best: (self.method == Method::Get).then(|| self.best_version()),
            acknowledged,
            answered: self.answered(),
        };

        METRICS.record_outcome(success);
        if !success {
            tracing::debug!(
                "{} quorum not reached: {}/{} acks from {} replicas",
                self.method,
                acknowledged,
                self.ack,
                self.from
            );
        }

        let outcome = self.outcome.get_or_init(|| outcome);
        (self.on_finalize)(outcome);
    }
}
