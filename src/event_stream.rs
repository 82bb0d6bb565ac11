//! Writes lifecycle events to every configured sink.
//!
//! Dual-sink: every event lands in the store's local event table (which
//! backs the fast-heartbeat topology predicate) and, best-effort, on an
//! external Redis stream for distributed consumers. The Redis side can
//! fail silently — it must never block or fail a heartbeat.

use std::collections::HashMap;
use std::sync::Arc;

use redis::AsyncCommands;
use serde_json::Value;
use tracing::{debug, warn};

use crate::model::{EventType, RegistryEvent};
use crate::store::Store;

const MESH_EVENTS_STREAM: &str = "mesh:events";

enum Sink {
    None,
    Redis { client: redis::Client },
}

/// Writes lifecycle events to the store and, when configured, mirrors them
/// to Redis. Construct once at startup and share via `Arc`.
pub struct EventStream {
    store: Option<Arc<dyn Store>>,
    sink: Sink,
}

impl EventStream {
    /// Build a stream writer backed by `store`, mirroring to Redis at
    /// `redis_url` when `enabled` is true.
    pub fn new(store: Arc<dyn Store>, redis_url: &str, enabled: bool) -> Self {
        let sink = if !enabled {
            Sink::None
        } else {
            match redis::Client::open(redis_url) {
                Ok(client) => Sink::Redis { client },
                Err(e) => {
                    warn!("event stream: failed to create redis client: {}", e);
                    Sink::None
                }
            }
        };
        Self { store: Some(store), sink }
    }

    /// A writer with no store and no external sink, for unit tests that
    /// only care about in-memory event bookkeeping done elsewhere.
    pub fn local_only() -> Self {
        Self { store: None, sink: Sink::None }
    }

    /// Append `event_type` for `agent_id` to every configured sink.
    /// Returns the recorded event when a store is attached.
    pub async fn emit(
        &self,
        event_type: EventType,
        agent_id: &str,
        data: HashMap<String, Value>,
    ) -> Option<RegistryEvent> {
        let recorded = match &self.store {
            Some(store) => match store.append_event(event_type, agent_id, data.clone()).await {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("event stream: failed to append local event: {}", e);
                    None
                }
            },
            None => None,
        };

        self.publish_external(event_type, agent_id, &data).await;
        recorded
    }

    async fn publish_external(&self, event_type: EventType, agent_id: &str, data: &HashMap<String, Value>) {
        let Sink::Redis { client } = &self.sink else { return };

        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                debug!("event stream: redis connection unavailable: {}", e);
                return;
            }
        };

        let mut fields: Vec<(String, String)> = vec![
            ("type".to_string(), event_type.as_str().to_string()),
            ("agent_id".to_string(), agent_id.to_string()),
        ];
        for (key, value) in data {
            fields.push((key.clone(), value_to_string(value)));
        }
        let items: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let result: Result<String, redis::RedisError> = conn.xadd(MESH_EVENTS_STREAM, "*", &items).await;
        if let Err(e) = result {
            debug!("event stream: failed to publish to redis: {}", e);
        }
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn emit_without_redis_still_appends_locally() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let stream = EventStream::new(store.clone(), "redis://localhost:6379", false);
        let event = stream.emit(EventType::Register, "a1", HashMap::new()).await;
        assert!(event.is_some());
        assert_eq!(store.all_events().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn local_only_writer_never_touches_a_store() {
        let stream = EventStream::local_only();
        let event = stream.emit(EventType::Heartbeat, "a1", HashMap::new()).await;
        assert!(event.is_none());
    }

    #[tokio::test]
    async fn unreachable_redis_does_not_fail_the_emit() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        // Port 1 is not a real redis instance; the client opens lazily so
        // this only fails when the connection is actually attempted.
        let stream = EventStream::new(store.clone(), "redis://127.0.0.1:1", true);
        let event = stream.emit(EventType::Register, "a1", HashMap::new()).await;
        assert!(event.is_some());
    }
}
