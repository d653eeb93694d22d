//! Node statistics sample and its `time|keys|tasks` wire format

use serde::Serialize;

use crate::common::{Error, Result};

/// One observation of a node's load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InspectorSample {
    /// Milliseconds since the Unix epoch
    pub time: i64,
    #[serde(rename = "keys")]
    pub key_count: u64,
    #[serde(rename = "task_in_queue")]
    pub task_count: u64,
}

impl InspectorSample {
    pub fn new(time: i64, key_count: u64, task_count: u64) -> Self {
        Self {
            time,
            key_count,
            task_count,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        format!("{}|{}|{}", self.time, self.key_count, self.task_count).into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::Corrupted("inspector sample is not UTF-8".into()))?;

        let mut parts = text.trim().split('|');
        let (Some(time), Some(keys), Some(tasks), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Corrupted(format!(
                "inspector sample needs 3 fields: {:?}",
                text
            )));
        };

        let field = |name: &str, value: &str| {
            Error::Corrupted(format!("bad {} in inspector sample: {:?}", name, value))
        };
        Ok(Self {
            time: time.parse().map_err(|_| field("time", time))?,
            key_count: keys.parse().map_err(|_| field("key count", keys))?,
            task_count: tasks.parse().map_err(|_| field("task count", tasks))?,
        })
    }

    /// Storage key ordering samples by time
    pub fn storage_key(time: i64) -> String {
        format!("{:020}", time.max(0))
    }
}
