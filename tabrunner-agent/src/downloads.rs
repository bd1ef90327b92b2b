use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

pub const DOWNLOAD_HISTORY_CAPACITY: usize = 50;

/// A completed download as reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRecord {
    pub id: Value,
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub final_url: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    /// Milliseconds since the Unix epoch at which the agent saw it complete
    #[serde(default)]
    pub timestamp: i64,
}

/// The most recent downloads, oldest first.
#[derive(Debug, Clone, Default)]
pub struct DownloadTracker {
    records: VecDeque<DownloadRecord>,
}

impl DownloadTracker {
    pub fn from_records(records: Vec<DownloadRecord>) -> Self {
        let mut tracker = Self::default();
        for record in records {
            tracker.push(record);
        }
        tracker
    }

    pub fn push(&mut self, mut record: DownloadRecord) {
        if record.final_url.is_none() {
            record.final_url = Some(record.url.clone());
        }
        if record.timestamp == 0 {
            record.timestamp = chrono::Utc::now().timestamp_millis();
        }
        if self.records.len() == DOWNLOAD_HISTORY_CAPACITY {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn records(&self) -> Vec<DownloadRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
