//! Inspector of the host node
//!
//! Keeps one time-series per peer, keyed by the zero-padded sample time so
//! that a range scan over storage returns samples in time order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cluster::ShardRouter;
use crate::common::{Error, NodeConfig, Result, Storage};
use crate::inspector::{
    InfoProvider, InspectorQuery, InspectorSample, InspectorService, StatsSource, INFO_ENDPOINT,
};

pub struct ActualInspector {
    info: InfoProvider,
    poller: Arc<Poller>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Polling half, shared with the background task
struct Poller {
    router: Arc<ShardRouter>,
    /// Time-series per shard, in shard order
    series: Vec<Storage>,
    client: reqwest::Client,
}

impl ActualInspector {
    pub fn open(config: &NodeConfig, router: Arc<ShardRouter>) -> Result<Self> {
        let root = config.data_dir.join("inspector");
        let series = (0..router.cluster_size())
            .map(|shard| Storage::open(config.storage, root.join(shard.to_string())))
            .collect::<Result<Vec<_>>>()?;

        let client = reqwest::Client::builder()
            .timeout(config.inspector.request_timeout())
            .build()?;

        Ok(Self {
            info: InfoProvider::default(),
            poller: Arc::new(Poller {
                router,
                series,
                client,
            }),
            interval: config.inspector.interval().max(Duration::from_millis(1)),
            task: Mutex::new(None),
        })
    }

    /// Poll every peer once. Returns how many samples were stored.
    pub async fn poll_once(&self) -> usize {
        self.poller.poll_once().await
    }

    /// Store a sample in its original wire form.
    pub fn record(&self, shard: usize, raw: &[u8]) -> Result<()> {
        self.poller.record(shard, raw)
    }

    /// Samples of `shard` with `from <= time <= to`
    pub fn samples(&self, shard: usize, from: i64, to: i64) -> Result<Vec<InspectorSample>> {
        let storage = self
            .poller
            .series
            .get(shard)
            .ok_or(Error::ShardNotFound(shard))?;
        if to < 0 {
            return Ok(Vec::new());
        }

        let start = InspectorSample::storage_key(from);
        let end = InspectorSample::storage_key(to.saturating_add(1));

        let mut samples = Vec::new();
        for item in storage.range(&start, Some(end.as_str()))? {
            let (key, raw) = item?;
            match InspectorSample::decode(&raw) {
                Ok(sample) => samples.push(sample),
                Err(e) => tracing::warn!("Skipping inspector sample {}: {}", key, e),
            }
        }
        Ok(samples)
    }

    /// Validate a query into `(shard, from, to)`, or the message to answer with.
    fn parse_query(
        &self,
        query: &InspectorQuery,
    ) -> std::result::Result<(usize, i64, i64), &'static str> {
        let (Some(from), Some(to)) = (&query.from, &query.to) else {
            return Err("Time to and from must be as parameters");
        };
        let (Ok(from), Ok(to)) = (from.parse::<i64>(), to.parse::<i64>()) else {
            return Err("Times must be longs");
        };
        if from > to {
            return Err("Time from must be <= time to");
        }

        let Some(shard) = &query.shard else {
            return Err("Must be a shard number");
        };
        let Ok(shard) = shard.parse::<i64>() else {
            return Err("Shard must be a number");
        };
        if shard < 0 || shard as usize >= self.poller.router.cluster_size() {
            return Err("Illegal shard");
        }

        Ok((shard as usize, from, to))
    }
}

impl Poller {
    async fn poll_once(&self) -> usize {
        let polls = self
            .router
            .addresses()
            .iter()
            .enumerate()
            .map(|(shard, url)| self.poll_peer(shard, url));

        join_all(polls).await.into_iter().filter(|stored| *stored).count()
    }

    async fn poll_peer(&self, shard: usize, url: &str) -> bool {
        let result = match self.fetch(url).await {
            Ok(body) => self.record(shard, &body),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Inspector poll of {} failed: {}", url, e);
                false
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(format!("{}{}", url.trim_end_matches('/'), INFO_ENDPOINT))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Http(format!("info returned {}", response.status())));
        }
        Ok(response.bytes().await?)
    }

    fn record(&self, shard: usize, raw: &[u8]) -> Result<()> {
        let sample = InspectorSample::decode(raw)?;
        let storage = self.series.get(shard).ok_or(Error::ShardNotFound(shard))?;
        storage.put(&InspectorSample::storage_key(sample.time), raw)
    }
}

impl InspectorService for ActualInspector {
    fn handle_request(&self, query: &InspectorQuery) -> Response {
        let (shard, from, to) = match self.parse_query(query) {
            Ok(parsed) => parsed,
            Err(message) => return (StatusCode::BAD_REQUEST, message).into_response(),
        };

        match self.samples(shard, from, to) {
            Ok(values) => Json(serde_json::json!({
                "shard": shard,
                "url": self.poller.router.addresses()[shard],
                "values": values,
            }))
            .into_response(),
            Err(e) => (e.to_http_status(), e.to_string()).into_response(),
        }
    }

    fn handle_info_request(&self) -> Response {
        self.info.response()
    }

    fn set_data(&self, source: Arc<dyn StatsSource>) {
        self.info.set(source);
    }

    fn start(&self) {
        let Ok(mut task) = self.task.lock() else {
            return;
        };
        if task.is_some() {
            return;
        }

        let poller = self.poller.clone();
        let period = self.interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let stored = poller.poll_once().await;
                tracing::trace!("Inspector stored {} samples", stored);
            }
        }));
        tracing::info!("Inspector polling every {:?}", period);
    }

    fn stop(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

impl Drop for ActualInspector {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;

    fn inspector(cluster: Vec<String>) -> ActualInspector {
        let router = Arc::new(ShardRouter::build(cluster.clone()).unwrap());
        let mut config = NodeConfig::new(cluster[0].clone(), cluster);
        config.inspector.request_timeout_ms = 500;
        ActualInspector::open(&config, router).unwrap()
    }

    fn query(shard: Option<&str>, from: Option<&str>, to: Option<&str>) -> InspectorQuery {
        InspectorQuery {
            shard: shard.map(str::to_owned),
            from: from.map(str::to_owned),
            to: to.map(str::to_owned),
            raw: String::new(),
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_validation_messages() {
        let inspector = inspector(vec!["http://a".into(), "http://b".into()]);
        let cases = [
            (query(Some("0"), None, Some("1")), "Time to and from must be as parameters"),
            (query(Some("0"), Some("x"), Some("1")), "Times must be longs"),
            (query(Some("0"), Some("5"), Some("1")), "Time from must be <= time to"),
            (query(None, Some("0"), Some("1")), "Must be a shard number"),
            (query(Some("one"), Some("0"), Some("1")), "Shard must be a number"),
            (query(Some("2"), Some("0"), Some("1")), "Illegal shard"),
            (query(Some("-1"), Some("0"), Some("1")), "Illegal shard"),
        ];

        for (query, expected) in cases {
            let response = inspector.handle_request(&query);
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_text(response).await, expected);
        }
    }

    #[tokio::test]
    async fn test_range_is_inclusive_and_ordered() {
        let inspector = inspector(vec!["http://a".into(), "http://b".into()]);
        for time in [1000, 999, 2000, 3000] {
            inspector
                .record(1, &InspectorSample::new(time, time as u64, 1).encode())
                .unwrap();
        }

        let times: Vec<i64> = inspector
            .samples(1, 999, 2000)
            .unwrap()
            .iter()
            .map(|s| s.time)
            .collect();
        assert_eq!(times, vec![999, 1000, 2000]);
        assert!(inspector.samples(0, 0, 5000).unwrap().is_empty());

        let response = inspector.handle_request(&query(Some("1"), Some("3000"), Some("3000")));
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["shard"], 1);
        assert_eq!(json["url"], "http://b");
        assert_eq!(json["values"][0]["time"], 3000);
        assert_eq!(json["values"][0]["keys"], 3000);
        assert_eq!(json["values"][0]["task_in_queue"], 1);
    }

    #[tokio::test]
    async fn test_poll_once_stores_reachable_peers() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new().route(INFO_ENDPOINT, get(|| async { "1234|5|6" }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Bind then drop to get a port nobody listens on.
        let dead_port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let dead = format!("http://127.0.0.1:{}", dead_port);

        let inspector = inspector(vec![live.clone(), dead]);
        assert_eq!(inspector.poll_once().await, 1);

        let shard = inspector.poller.router.shard_of_address(&live).unwrap();
        let samples = inspector.samples(shard, 0, i64::MAX).unwrap();
        assert_eq!(samples, vec![InspectorSample::new(1234, 5, 6)]);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let inspector = inspector(vec!["http://a".into()]);
        inspector.start();
        inspector.start();
        assert!(inspector.task.lock().unwrap().is_some());
        inspector.stop();
        assert!(inspector.task.lock().unwrap().is_none());
    }
}
