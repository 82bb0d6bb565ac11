use std::sync::Arc;
use std::time::Duration;

use mesh_registry_core::cache::AgentListCache;
use mesh_registry_core::config::RegistryConfig;
use mesh_registry_core::event_stream::EventStream;
use mesh_registry_core::health::HealthMonitor;
use mesh_registry_core::http::{router, AppState};
use mesh_registry_core::store::{InMemoryStore, Store};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RegistryConfig::resolve();
    tracing::info!(bind_addr = %config.bind_addr, "starting mesh registry");

    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let events = Arc::new(EventStream::new(store.clone(), &config.redis_url, config.tracing_enabled));
    let health_monitor = Arc::new(HealthMonitor::new());

    health_monitor
        .start(
            store.clone(),
            events.clone(),
            Duration::from_secs(config.health_check_interval_secs),
            Duration::from_secs(config.heartbeat_timeout_secs),
        )
        .await;

    let state = Arc::new(AppState {
        store,
        events,
        cache: AgentListCache::new(config.response_cache_enabled),
        health_monitor: health_monitor.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr.as_str()).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, router(state)).await?;

    health_monitor.stop().await;
    Ok(())
}
