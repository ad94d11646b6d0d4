use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

use mnemosyne_types::StreamEvent;

use crate::error::Result;

/// Consumer-group client over a broker stream.
///
/// Read order is pending-first: entries previously delivered to this consumer
/// but never acknowledged are drained before any new entry is requested, so a
/// crash-restart replays exactly the unfinished work.
#[derive(Clone)]
pub struct StreamProvider {
    manager: ConnectionManager,
}

impl StreamProvider {
    /// Connect and verify the broker answers.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let client = redis::Client::open(format!("redis://{host}:{port}/"))?;
        let manager = client.get_connection_manager().await?;

        let mut con = manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut con).await?;

        tracing::info!(host, port, "connected to broker");
        Ok(Self { manager })
    }

    /// Create the consumer group, creating the stream if needed.
    /// An already-existing group is not an error.
    pub async fn ensure_group(&self, stream_key: &str, group_name: &str) -> Result<()> {
        let mut con = self.manager.clone();
        let created: redis::RedisResult<String> =
            con.xgroup_create_mkstream(stream_key, group_name, "0").await;

        match created {
            Ok(_) => {
                tracing::info!(stream = stream_key, group = group_name, "created consumer group");
                Ok(())
            }
            Err(err) if err.to_string().contains("BUSYGROUP") => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Read up to `count` entries for this consumer: pending entries first
    /// (id `0`, no block), then new entries (id `>`) with `block_ms` wait.
    pub async fn read_group(
        &self,
        stream_key: &str,
        group_name: &str,
        consumer_name: &str,
        count: usize,
        block_ms: usize,
    ) -> Result<Vec<StreamEvent>> {
        let mut con = self.manager.clone();

        let pending_opts = StreamReadOptions::default()
            .group(group_name, consumer_name)
            .count(count);
        let reply: StreamReadReply = con
            .xread_options(&[stream_key], &["0"], &pending_opts)
            .await?;
        let pending = collect_events(reply);
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "retrieved pending entries");
            return Ok(pending);
        }

        let new_opts = StreamReadOptions::default()
            .group(group_name, consumer_name)
            .count(count)
            .block(block_ms);
        let reply: StreamReadReply = con
            .xread_options(&[stream_key], &[">"], &new_opts)
            .await?;
        Ok(collect_events(reply))
    }

    /// Acknowledge processed entries.
    pub async fn ack(&self, stream_key: &str, group_name: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut con = self.manager.clone();
        let _: i64 = con.xack(stream_key, group_name, ids).await?;
        Ok(())
    }
}

fn collect_events(reply: StreamReadReply) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    for key in reply.keys {
        for entry in key.ids {
            events.push(StreamEvent {
                session_uuid: entry.get("session_uuid"),
                unix_time: entry.get("unix_time").unwrap_or(0),
                process_name: entry
                    .get("process_name")
                    .unwrap_or_else(|| "unknown".to_string()),
                window_title: entry
                    .get("window_title")
                    .unwrap_or_else(|| "unknown".to_string()),
                window_hwnd: entry.get("window_hwnd"),
                input_idle: entry.get("input_idle").unwrap_or(0),
                intensity: entry.get("intensity").unwrap_or(0.0),
                stream_id: entry.id,
            });
        }
    }
    events
}
