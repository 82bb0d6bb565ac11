//! The registry's store: agents, capabilities and the event log.
//!
//! Persistence requirements stop at "transactional" semantics; there's
//! no database layer in the agent SDK core to inherit, so this is an
//! in-process store guarded by a single `tokio::sync::RwLock`. Holding
//! the write guard across a whole registration or heartbeat is the
//! "transaction" (see DESIGN.md).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{RegistryError, Result};
use crate::model::{Agent, AgentStatus, Capability, RegistryEvent};

/// Everything the rest of the registry needs from persistence.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_agent(&self, agent: Agent) -> Result<()>;
    async fn replace_capabilities(&self, agent_id: &str, caps: Vec<Capability>) -> Result<()>;
    async fn get_agent(&self, agent_id: &str) -> Result<Agent>;
    async fn get_capabilities(&self, agent_id: &str) -> Result<Vec<Capability>>;
    async fn list_agents(&self) -> Result<Vec<Agent>>;
    async fn delete_agent(&self, agent_id: &str) -> Result<()>;

    /// Set status and, when `preserve_timestamp` is false, bump `updated_at`.
    async fn set_status(&self, agent_id: &str, status: AgentStatus, preserve_timestamp: bool) -> Result<()>;

    /// Record the dependency counters surfaced in `/agents`.
    async fn set_dependency_counts(&self, agent_id: &str, total: usize, resolved: usize) -> Result<()>;

    /// Candidate providers for a capability name, regardless of match (the
    /// matcher in `matcher.rs` filters and scores these).
    async fn find_providers(&self, capability: &str) -> Result<Vec<(Agent, Capability)>>;

    /// Every LLM-callable capability in the mesh, for the tool filter.
    async fn list_llm_capabilities(&self) -> Result<Vec<(Agent, Capability)>>;

    async fn append_event(&self, event_type: crate::model::EventType, agent_id: &str, data: HashMap<String, serde_json::Value>) -> Result<RegistryEvent>;

    /// Any topology-affecting event recorded after `since`.
    async fn has_events_since(&self, since: DateTime<Utc>) -> Result<bool>;

    async fn all_events(&self) -> Result<Vec<RegistryEvent>>;
}

#[derive(Default)]
struct Inner {
    agents: HashMap<String, Agent>,
    /// capability name -> agent ids that provide it, in insertion order
    /// (the resolver's tie-break rule, see DESIGN.md).
    by_capability: HashMap<String, Vec<String>>,
    capabilities: HashMap<String, Vec<Capability>>,
    events: Vec<RegistryEvent>,
    next_event_id: u64,
}

pub struct InMemoryStore {
    inner: tokio::sync::RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: tokio::sync::RwLock::new(Inner::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn reindex_capabilities(inner: &mut Inner, agent_id: &str, caps: &[Capability]) {
    for ids in inner.by_capability.values_mut() {
        ids.retain(|id| id != agent_id);
    }
    for cap in caps {
        let ids = inner.by_capability.entry(cap.capability.clone()).or_default();
        if !ids.contains(&agent_id.to_string()) {
            ids.push(agent_id.to_string());
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_agent(&self, agent: Agent) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.agents.insert(agent.id.clone(), agent);
        Ok(())
    }

    async fn replace_capabilities(&self, agent_id: &str, caps: Vec<Capability>) -> Result<()> {
        let mut inner = self.inner.write().await;
        reindex_capabilities(&mut inner, agent_id, &caps);
        inner.capabilities.insert(agent_id.to_string(), caps);
        Ok(())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Agent> {
        let inner = self.inner.read().await;
        inner
            .agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))
    }

    async fn get_capabilities(&self, agent_id: &str) -> Result<Vec<Capability>> {
        let inner = self.inner.read().await;
        Ok(inner.capabilities.get(agent_id).cloned().unwrap_or_default())
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        let inner = self.inner.read().await;
        Ok(inner.agents.values().cloned().collect())
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.agents.remove(agent_id).is_none() {
            return Err(RegistryError::NotFound(agent_id.to_string()));
        }
        inner.capabilities.remove(agent_id);
        for ids in inner.by_capability.values_mut() {
            ids.retain(|id| id != agent_id);
        }
        Ok(())
    }

    async fn set_status(&self, agent_id: &str, status: AgentStatus, preserve_timestamp: bool) -> Result<()> {
        let mut inner = self.inner.write().await;
        let agent = inner
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))?;
        agent.status = status;
        if !preserve_timestamp {
            agent.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_dependency_counts(&self, agent_id: &str, total: usize, resolved: usize) -> Result<()> {
        let mut inner = self.inner.write().await;
        let agent = inner
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))?;
        agent.total_dependencies = total;
        agent.dependencies_resolved = resolved;
        Ok(())
    }

    async fn find_providers(&self, capability: &str) -> Result<Vec<(Agent, Capability)>> {
        let inner = self.inner.read().await;
        let Some(ids) = inner.by_capability.get(capability) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for id in ids {
            let Some(agent) = inner.agents.get(id) else { continue };
            let Some(caps) = inner.capabilities.get(id) else { continue };
            for cap in caps.iter().filter(|c| c.capability == capability) {
                out.push((agent.clone(), cap.clone()));
            }
        }
        Ok(out)
    }

    async fn list_llm_capabilities(&self) -> Result<Vec<(Agent, Capability)>> {
        let inner = self.inner.read().await;
        let mut out = Vec::new();
        for (id, caps) in inner.capabilities.iter() {
            let Some(agent) = inner.agents.get(id) else { continue };
            for cap in caps.iter().filter(|c| c.is_llm_callable()) {
                out.push((agent.clone(), cap.clone()));
            }
        }
        Ok(out)
    }

    async fn append_event(
        &self,
        event_type: crate::model::EventType,
        agent_id: &str,
        data: HashMap<String, serde_json::Value>,
    ) -> Result<RegistryEvent> {
        let mut inner = self.inner.write().await;
        inner.next_event_id += 1;
        let event = RegistryEvent {
            id: inner.next_event_id,
            event_type,
            agent_id: agent_id.to_string(),
            timestamp: Utc::now(),
            data,
        };
        inner.events.push(event.clone());
        Ok(event)
    }

    async fn has_events_since(&self, since: DateTime<Utc>) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .iter()
            .any(|e| e.event_type.affects_topology() && e.timestamp > since))
    }

    async fn all_events(&self) -> Result<Vec<RegistryEvent>> {
        let inner = self.inner.read().await;
        Ok(inner.events.clone())
    }
}
