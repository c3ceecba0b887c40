//! C7 — EventIngestor: reads filesystem change events from a Redis Stream
//! through a consumer group, giving at-least-once delivery across restarts.
//! A rename is materialized as a delete followed by an add, since the rest
//! of the pipeline has no "move" concept. Reconnects back off along a fixed
//! schedule and reset to the floor the moment a read succeeds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{StreamAutoClaimReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisResult};
use tracing::{error, info, warn};

use crate::error::{CatalogError, Result};

/// §4's reconnect schedule: 5/10/15/20/25/30s, holding at 30s thereafter.
const BACKOFF_SCHEDULE_SECS: [u64; 6] = [5, 10, 15, 20, 25, 30];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileEvent {
    Added(String),
    Changed(String),
    Removed(String),
    Renamed { from: String, to: String },
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn handle(&self, event: FileEvent) -> Result<()>;
}

pub struct EventIngestor {
    client: redis::Client,
    stream_key: String,
    group: String,
    consumer: String,
    pending_idle: Duration,
    stopped: Arc<AtomicBool>,
}

impl EventIngestor {
    pub fn new(
        redis_url: &str,
        stream_key: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        pending_idle: Duration,
    ) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CatalogError::InvalidConfig(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            stream_key: stream_key.into(),
            group: group.into(),
            consumer: consumer.into(),
            pending_idle,
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Idempotent: calling `stop` more than once, or before `run` starts,
    /// is a harmless no-op.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Runs until `stop()` is called. Reconnects on any Redis error along
    /// the backoff schedule; a successful poll resets the backoff index.
    pub async fn run(&self, sink: Arc<dyn EventSink>) -> Result<()> {
        let mut backoff_idx = 0usize;

        while !self.is_stopped() {
            match self.connect_and_poll_loop(&sink).await {
                Ok(()) => break, // stopped cleanly mid-loop
                Err(e) => {
                    warn!(error = %e, "event ingestor connection lost, reconnecting");
                    let delay = BACKOFF_SCHEDULE_SECS[backoff_idx.min(BACKOFF_SCHEDULE_SECS.len() - 1)];
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    backoff_idx += 1;
                }
            }
        }
        Ok(())
    }

    async fn connect_and_poll_loop(&self, sink: &Arc<dyn EventSink>) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CatalogError::TransientIo(e.to_string()))?;

        let _: RedisResult<()> = conn
            .xgroup_create_mkstream(&self.stream_key, &self.group, "$")
            .await;
        // BUSYGROUP ("already exists") is expected on every restart after
        // the first and is not an error.

        while !self.is_stopped() {
            self.replay_pending(&mut conn, sink).await?;
            self.read_new(&mut conn, sink).await?;
        }
        Ok(())
    }

    /// Re-claims entries idle longer than `pending_idle` from any consumer
    /// (including a prior instance of this one that crashed) and redelivers
    /// them before reading anything new — the at-least-once guarantee.
    async fn replay_pending(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        sink: &Arc<dyn EventSink>,
    ) -> Result<()> {
        let idle_ms = self.pending_idle.as_millis() as usize;
        let claimed: StreamAutoClaimReply = conn
            .xautoclaim_options(
                &self.stream_key,
                &self.group,
                &self.consumer,
                idle_ms,
                "0-0",
                redis::streams::StreamAutoClaimOptions::default().count(32),
            )
            .await
            .map_err(|e| CatalogError::TransientIo(e.to_string()))?;

        for entry in claimed.claimed {
            self.process_entry(conn, sink, &entry.id, &entry.map).await?;
        }
        Ok(())
    }

    async fn read_new(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        sink: &Arc<dyn EventSink>,
    ) -> Result<()> {
        let opts = StreamReadOptions::default().group(&self.group, &self.consumer).count(32).block(2_000);
        let reply: StreamReadReply = conn
            .xread_options(&[&self.stream_key], &[">"], &opts)
            .await
            .map_err(|e| CatalogError::TransientIo(e.to_string()))?;

        for key in reply.keys {
            for entry in key.ids {
                self.process_entry(conn, sink, &entry.id, &entry.map).await?;
            }
        }
        Ok(())
    }

    async fn process_entry(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        sink: &Arc<dyn EventSink>,
        id: &str,
        fields: &std::collections::HashMap<String, redis::Value>,
    ) -> Result<()> {
        match parse_event(fields) {
            Some(event) => {
                if let Err(e) = self.dispatch(sink, event).await {
                    error!(stream_id = id, error = %e, "failed to handle event, leaving pending for retry");
                    return Ok(()); // left un-acked; replay_pending retries it later
                }
            }
            None => {
                warn!(stream_id = id, "corrupt event entry, acking to avoid poison-message loop");
            }
        }

        let _: RedisResult<i64> = conn.xack(&self.stream_key, &self.group, &[id]).await;
        Ok(())
    }

    async fn dispatch(&self, sink: &Arc<dyn EventSink>, event: FileEvent) -> Result<()> {
        match event {
            FileEvent::Renamed { from, to } => {
                sink.handle(FileEvent::Removed(from)).await?;
                sink.handle(FileEvent::Added(to)).await
            }
            other => sink.handle(other).await,
        }
    }
}

fn field_str(fields: &std::collections::HashMap<String, redis::Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        redis::Value::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
        redis::Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

/// §6's wire contract: `type`, `path`, optional `oldPath` (rename only),
/// optional `midhash256` hint. `path` is always the event's current/target
/// path; for a rename, `oldPath` is where the file used to live.
fn parse_event(fields: &std::collections::HashMap<String, redis::Value>) -> Option<FileEvent> {
    let kind = field_str(fields, "type")?;
    match kind.as_str() {
        "add" => Some(FileEvent::Added(field_str(fields, "path")?)),
        "change" => Some(FileEvent::Changed(field_str(fields, "path")?)),
        "delete" => Some(FileEvent::Removed(field_str(fields, "path")?)),
        "rename" => {
            Some(FileEvent::Renamed { from: field_str(fields, "oldPath")?, to: field_str(fields, "path")? })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(v: &str) -> redis::Value {
        redis::Value::BulkString(v.as_bytes().to_vec())
    }

    #[test]
    fn parses_add_event() {
        let mut fields = std::collections::HashMap::new();
        fields.insert("type".to_string(), field("add"));
        fields.insert("path".to_string(), field("Movies/A/A.mkv"));
        assert_eq!(parse_event(&fields), Some(FileEvent::Added("Movies/A/A.mkv".into())));
    }

    #[test]
    fn parses_rename_event() {
        let mut fields = std::collections::HashMap::new();
        fields.insert("type".to_string(), field("rename"));
        fields.insert("path".to_string(), field("new.mkv"));
        fields.insert("oldPath".to_string(), field("old.mkv"));
        assert_eq!(
            parse_event(&fields),
            Some(FileEvent::Renamed { from: "old.mkv".into(), to: "new.mkv".into() })
        );
    }

    #[test]
    fn unknown_kind_is_none() {
        let mut fields = std::collections::HashMap::new();
        fields.insert("type".to_string(), field("teleport"));
        assert_eq!(parse_event(&fields), None);
    }

    #[test]
    fn stop_is_idempotent() {
        let ingestor =
            EventIngestor::new("redis://127.0.0.1/", "catalog:events", "catalogd", "c1", Duration::from_secs(30))
                .unwrap();
        ingestor.stop();
        ingestor.stop();
        assert!(ingestor.is_stopped());
    }

    #[derive(Default)]
    struct RecordingSink(tokio::sync::Mutex<Vec<FileEvent>>);

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn handle(&self, event: FileEvent) -> Result<()> {
            self.0.lock().await.push(event);
            Ok(())
        }
    }

    #[tokio::test]
    async fn rename_dispatches_as_delete_then_add() {
        let ingestor =
            EventIngestor::new("redis://127.0.0.1/", "catalog:events", "catalogd", "c1", Duration::from_secs(30))
                .unwrap();
        let recording = Arc::new(RecordingSink::default());
        let sink: Arc<dyn EventSink> = recording.clone();
        ingestor
            .dispatch(&sink, FileEvent::Renamed { from: "old.mkv".into(), to: "new.mkv".into() })
            .await
            .unwrap();

        let events = recording.0.lock().await;
        assert_eq!(*events, vec![FileEvent::Removed("old.mkv".into()), FileEvent::Added("new.mkv".into())]);
    }
}
