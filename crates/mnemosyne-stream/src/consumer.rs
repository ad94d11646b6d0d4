use std::collections::HashMap;

use mnemosyne_types::{EventGroup, StreamEvent};

use crate::error::Result;
use crate::provider::StreamProvider;

pub const STREAM_KEY: &str = "mnemosyne:events";
pub const GROUP_NAME: &str = "mnemosyne_brain_group";
const DEFAULT_CONSUMER_NAME: &str = "brain-worker-1";
const READ_BLOCK_MS: usize = 2000;

/// Consumes broker entries and collapses them into fingerprint groups,
/// replacing the SQL GROUP BY of the store path.
pub struct StreamConsumer {
    provider: StreamProvider,
    stream_key: String,
    consumer_name: String,
}

impl StreamConsumer {
    /// Wrap a connected provider and ensure the consumer group exists.
    ///
    /// The consumer name is stable per process so pending entries are
    /// replayed to the same consumer after a restart.
    pub async fn new(provider: StreamProvider) -> Result<Self> {
        provider.ensure_group(STREAM_KEY, GROUP_NAME).await?;

        let consumer_name = std::env::var("MNEMOSYNE_CONSUMER_NAME")
            .unwrap_or_else(|_| DEFAULT_CONSUMER_NAME.to_string());

        Ok(Self {
            provider,
            stream_key: STREAM_KEY.to_string(),
            consumer_name,
        })
    }

    /// One read cycle: fetch up to `batch_size` entries and group them by
    /// `(process, window title)`, most active fingerprints first.
    pub async fn fetch_and_group(&self, batch_size: usize) -> Result<Vec<EventGroup>> {
        let events = self
            .provider
            .read_group(
                &self.stream_key,
                GROUP_NAME,
                &self.consumer_name,
                batch_size,
                READ_BLOCK_MS,
            )
            .await?;

        tracing::debug!(count = events.len(), stream = %self.stream_key, "broker read");
        Ok(group_events(events))
    }

    /// Acknowledge every entry carried by the given groups. Returns the
    /// number of entries acknowledged.
    pub async fn ack_groups(&self, groups: &[EventGroup]) -> Result<usize> {
        let ids: Vec<String> = groups
            .iter()
            .flat_map(|g| g.ack_ids.iter().cloned())
            .collect();
        let count = ids.len();

        self.provider.ack(&self.stream_key, GROUP_NAME, &ids).await?;
        if count > 0 {
            tracing::debug!(count, "acknowledged broker entries");
        }
        Ok(count)
    }
}

/// Group raw broker entries by fingerprint, computing the same aggregates
/// as the store path, sorted by event count descending.
pub fn group_events(events: Vec<StreamEvent>) -> Vec<EventGroup> {
    if events.is_empty() {
        return Vec::new();
    }

    let mut buckets: HashMap<(String, String), Vec<StreamEvent>> = HashMap::new();
    for event in events {
        let key = (event.process_name.clone(), event.window_title.clone());
        buckets.entry(key).or_default().push(event);
    }

    let mut groups: Vec<EventGroup> = buckets
        .into_iter()
        .map(|((process_name, window_title), members)| {
            let first_seen = members.iter().map(|e| e.unix_time).min().unwrap_or(0);
            let last_seen = members.iter().map(|e| e.unix_time).max().unwrap_or(0);
            let avg_intensity =
                members.iter().map(|e| e.intensity).sum::<f64>() / members.len() as f64;
            let ack_ids = members.iter().map(|e| e.stream_id.clone()).collect();

            EventGroup {
                process_name,
                window_title,
                event_ids: Vec::new(),
                event_count: members.len(),
                first_seen,
                last_seen,
                avg_intensity,
                ack_ids,
                screenshot_path: None,
                events: members,
            }
        })
        .collect();

    groups.sort_by(|a, b| b.event_count.cmp(&a.event_count));
    groups
}
