//! Background sweep marking stale agents unhealthy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::event_stream::EventStream;
use crate::model::{AgentStatus, EventType};
use crate::store::Store;

/// Owns the background sweep task. Start/stop are idempotent; stop waits
/// for any in-flight scan to finish before returning.
pub struct HealthMonitor {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self { handle: Mutex::new(None) }
    }

    /// Start the periodic sweep if not already running.
    pub async fn start(
        self: &Arc<Self>,
        store: Arc<dyn Store>,
        events: Arc<EventStream>,
        check_interval: Duration,
        heartbeat_timeout: Duration,
    ) {
        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            debug!("health monitor already running");
            return;
        }

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = sweep(store.as_ref(), events.as_ref(), heartbeat_timeout).await {
                    tracing::warn!("health monitor sweep failed: {}", e);
                }
            }
        });
        info!("health monitor started, interval={:?}", check_interval);
        *guard = Some(task);
    }

    /// Stop the sweep, joining the task if one is running.
    pub async fn stop(&self) {
        let mut guard = self.handle.lock().await;
        if let Some(task) = guard.take() {
            task.abort();
            let _ = task.await;
            info!("health monitor stopped");
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a single scan: mark agents unhealthy whose `updated_at` is older
/// than `heartbeat_timeout`, preserving `updated_at` so repeated scans are
/// idempotent. Already-unhealthy agents are never re-processed.
pub async fn sweep(store: &dyn Store, events: &EventStream, heartbeat_timeout: Duration) -> crate::error::Result<usize> {
    let now = Utc::now();
    let deadline = now - chrono::Duration::from_std(heartbeat_timeout).unwrap_or_default();

    let agents = store.list_agents().await?;
    let mut marked = 0;
    for agent in agents {
        if agent.status == AgentStatus::Unhealthy {
            continue;
        }
        if agent.updated_at >= deadline {
            continue;
        }

        store.set_status(&agent.id, AgentStatus::Unhealthy, true).await?;

        let mut data = HashMap::new();
        data.insert("reason".to_string(), json!("heartbeat_timeout"));
        data.insert("detected_at".to_string(), json!(now.to_rfc3339()));
        data.insert("heartbeat_timeout".to_string(), json!(heartbeat_timeout.as_secs()));
        events.emit(EventType::Unhealthy, &agent.id, data).await;
        marked += 1;
    }
    Ok(marked)
}
