//! Full heartbeat, fast heartbeat, and unregister handling.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RegistryError, Result};
use crate::llm_filter::{resolve_llm_tools, FilterEntry, FilterMode, LlmFilter};
use crate::model::{
    Agent, AgentKind, AgentStatus, Capability, DependencySpec, EventType, LlmToolInfo,
    ResolvedDep, ResolvedLlmProvider, TagExpr,
};
use crate::resolver::{resolve_dependencies, resolve_llm_provider};
use crate::store::Store;

/// A tool declaration as carried in a full heartbeat payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDeclaration {
    pub function_name: String,
    pub capability: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub input_schema: Option<Value>,
    pub kwargs: Option<Value>,
    pub llm_filter: Option<Value>,
    pub llm_provider: Option<DependencyDeclaration>,
    #[serde(default)]
    pub dependencies: Vec<DependencyDeclaration>,
}

/// A single dependency entry as carried in a heartbeat payload. Tag
/// entries may themselves be lists, denoting an OR-group.
#[derive(Debug, Clone, Deserialize)]
pub struct DependencyDeclaration {
    pub capability: String,
    pub version: Option<String>,
    pub namespace: Option<String>,
    #[serde(default)]
    pub tags: Vec<TagEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TagEntry {
    Single(String),
    Group(Vec<String>),
}

impl DependencyDeclaration {
    fn into_spec(self) -> DependencySpec {
        let mut required = Vec::new();
        let mut or_groups = Vec::new();
        for entry in self.tags {
            match entry {
                TagEntry::Single(raw) => {
                    if let Some(expr) = TagExpr::parse(&raw) {
                        required.push(expr);
                    }
                }
                TagEntry::Group(raws) => {
                    let group: Vec<TagExpr> = raws.iter().filter_map(|r| TagExpr::parse(r)).collect();
                    if !group.is_empty() {
                        or_groups.push(group);
                    }
                }
            }
        }
        DependencySpec {
            capability: self.capability,
            version: self.version,
            required,
            or_groups,
            namespace: self.namespace,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatPayload {
    pub agent_id: String,
    #[serde(default, rename = "agent_type")]
    pub kind: Option<AgentKind>,
    pub name: Option<String>,
    #[serde(default)]
    pub version: String,
    pub namespace: Option<String>,
    #[serde(default, rename = "http_host")]
    pub host: Option<String>,
    #[serde(default, rename = "http_port")]
    pub port: u16,
    #[serde(default)]
    pub tools: Vec<ToolDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatResponse {
    pub status: &'static str,
    pub agent_id: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub message: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub dependencies_resolved: HashMap<String, Vec<ResolvedDep>>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub llm_tools: HashMap<String, Vec<LlmToolInfo>>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub llm_providers: HashMap<String, ResolvedLlmProvider>,
}

/// Build the registry-internal endpoint for an agent.
fn normalize_endpoint(host: Option<&str>, port: u16) -> String {
    if port == 0 {
        return String::new();
    }
    let host = host.unwrap_or("");
    let stripped = host
        .strip_prefix("http://")
        .or_else(|| host.strip_prefix("https://"))
        .unwrap_or(host);
    let host = if stripped.is_empty() || stripped == "0.0.0.0" {
        "localhost"
    } else {
        stripped
    };
    format!("http://{host}:{port}")
}

fn endpoint_for(id: &str, host: Option<&str>, port: u16) -> String {
    if port == 0 {
        format!("stdio://{id}")
    } else {
        normalize_endpoint(host, port)
    }
}

fn parse_llm_filter(value: &Value) -> Option<LlmFilter> {
    match value {
        Value::String(s) if s == "*" => Some(LlmFilter::Wildcard),
        Value::Array(items) => {
            let mut entries = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(capability) => entries.push(FilterEntry {
                        capability: Some(capability.clone()),
                        ..Default::default()
                    }),
                    Value::Object(obj) => {
                        let capability = obj.get("capability").and_then(|v| v.as_str()).map(str::to_string);
                        let version = obj.get("version").and_then(|v| v.as_str()).map(str::to_string);
                        let tags = obj
                            .get("tags")
                            .and_then(|v| v.as_array())
                            .map(|arr| {
                                arr.iter()
                                    .filter_map(|t| t.as_str())
                                    .filter_map(TagExpr::parse)
                                    .collect()
                            })
                            .unwrap_or_default();
                        entries.push(FilterEntry { capability, version, tags });
                    }
                    _ => {}
                }
            }
            Some(LlmFilter::Entries(entries))
        }
        _ => None,
    }
}

fn filter_mode_for(value: &Value) -> FilterMode {
    match value {
        Value::Object(obj) if obj.get("mode").and_then(|v| v.as_str()) == Some("best_match") => {
            FilterMode::BestMatch
        }
        _ => FilterMode::All,
    }
}

/// Handle a full (POST) heartbeat: upsert the agent, replace its
/// capabilities wholesale, resolve declared dependencies and LLM
/// filters/providers per tool, then emit the appropriate lifecycle event.
pub async fn handle_full_heartbeat(
    store: &dyn Store,
    events: &crate::event_stream::EventStream,
    payload: HeartbeatPayload,
) -> Result<HeartbeatResponse> {
    if payload.agent_id.trim().is_empty() {
        return Err(RegistryError::Validation("agent_id must not be empty".into()));
    }

    let kind = payload.kind.unwrap_or_default();
    let endpoint = endpoint_for(&payload.agent_id, payload.host.as_deref(), payload.port);
    let namespace = payload.namespace.clone().unwrap_or_else(|| "default".to_string());
    let name = payload.name.clone().unwrap_or_else(|| payload.agent_id.clone());

    let previous = store.get_agent(&payload.agent_id).await.ok();
    let now = Utc::now();

    let agent = Agent {
        id: payload.agent_id.clone(),
        name,
        kind,
        version: payload.version.clone(),
        endpoint,
        namespace,
        status: AgentStatus::Healthy,
        created_at: previous.as_ref().map(|a| a.created_at).unwrap_or(now),
        updated_at: now,
        last_full_refresh: now,
        total_dependencies: 0,
        dependencies_resolved: 0,
    };
    store.upsert_agent(agent).await?;

    let capabilities: Vec<Capability> = payload
        .tools
        .iter()
        .map(|tool| Capability {
            agent_id: payload.agent_id.clone(),
            function_name: tool.function_name.clone(),
            capability: tool.capability.clone(),
            version: tool.version.clone(),
            description: tool.description.clone(),
            tags: dedup_tags(&tool.tags),
            input_schema: tool.input_schema.clone(),
            kwargs: tool.kwargs.clone(),
        })
        .collect();
    store.replace_capabilities(&payload.agent_id, capabilities).await?;

    let mut dependencies_resolved = HashMap::new();
    let mut llm_tools = HashMap::new();
    let mut llm_providers = HashMap::new();

    for tool in &payload.tools {
        if !tool.dependencies.is_empty() {
            let specs: Vec<DependencySpec> = tool
                .dependencies
                .iter()
                .cloned()
                .map(DependencyDeclaration::into_spec)
                .collect();
            let resolved = resolve_dependencies(store, &specs).await?;
            dependencies_resolved.insert(tool.function_name.clone(), resolved);
        }

        if let Some(filter_value) = &tool.llm_filter {
            if let Some(filter) = parse_llm_filter(filter_value) {
                let mode = filter_mode_for(filter_value);
                let tools = resolve_llm_tools(store, &payload.agent_id, &filter, mode).await?;
                llm_tools.insert(tool.function_name.clone(), tools);
            }
        }

        if let Some(provider_spec) = &tool.llm_provider {
            let spec = provider_spec.clone().into_spec();
            if let Some(provider) = resolve_llm_provider(store, &spec).await? {
                llm_providers.insert(tool.function_name.clone(), provider);
            }
        }
    }

    let total_dependencies: usize = dependencies_resolved.values().map(|v| v.len()).sum();
    let resolved_count: usize = dependencies_resolved
        .values()
        .flatten()
        .filter(|d| d.status == crate::model::ResolutionStatus::Resolved)
        .count();
    store.set_dependency_counts(&payload.agent_id, total_dependencies, resolved_count).await?;

    if kind.emits_events() {
        let was_absent = previous.is_none();
        let was_unhealthy = previous.as_ref().map(|a| a.status == AgentStatus::Unhealthy).unwrap_or(false);
        if was_absent || was_unhealthy {
            let mut data = HashMap::new();
            if was_unhealthy {
                data.insert("reason".to_string(), Value::String("recovery".to_string()));
            }
            events.emit(EventType::Register, &payload.agent_id, data).await;
        } else {
            events.emit(EventType::Heartbeat, &payload.agent_id, HashMap::new()).await;
        }
    }

    Ok(HeartbeatResponse {
        status: "success",
        agent_id: payload.agent_id,
        timestamp: now,
        message: "heartbeat accepted".to_string(),
        dependencies_resolved,
        llm_tools,
        llm_providers,
    })
}

fn dedup_tags(tags: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.iter().filter(|t| seen.insert((*t).clone())).cloned().collect()
}

/// Outcome of a fast heartbeat probe, encoded as an HTTP status by the
/// transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastHeartbeatOutcome {
    /// 200 — no topology change since last full refresh.
    NoChange,
    /// 202 — topology changed; client must send a full heartbeat.
    TopologyChanged,
    /// 410 — unknown or unhealthy agent.
    ReregisterRequired,
}

/// Handle a fast (HEAD) heartbeat probe. Advances `updated_at` as a side
/// effect; never touches `last_full_refresh`.
pub async fn handle_fast_heartbeat(store: &dyn Store, agent_id: &str) -> Result<FastHeartbeatOutcome> {
    let agent = match store.get_agent(agent_id).await {
        Ok(agent) => agent,
        Err(RegistryError::NotFound(_)) => return Ok(FastHeartbeatOutcome::ReregisterRequired),
        Err(err) => return Err(err),
    };

    if agent.status == AgentStatus::Unhealthy {
        return Ok(FastHeartbeatOutcome::ReregisterRequired);
    }

    let changed = store.has_events_since(agent.last_full_refresh).await?;
    store.set_status(agent_id, agent.status, false).await?;

    Ok(if changed {
        FastHeartbeatOutcome::TopologyChanged
    } else {
        FastHeartbeatOutcome::NoChange
    })
}

/// Handle unregister (DELETE). Idempotent; always succeeds from the
/// caller's point of view.
pub async fn handle_unregister(store: &dyn Store, events: &crate::event_stream::EventStream, agent_id: &str) -> Result<()> {
    match store.get_agent(agent_id).await {
        Ok(_) => {
            let mut data = HashMap::new();
            data.insert("reason".to_string(), Value::String("graceful_shutdown".to_string()));
            events.emit(EventType::Unregister, agent_id, data).await;
            store.delete_agent(agent_id).await?;
        }
        Err(RegistryError::NotFound(_)) => {}
        Err(err) => return Err(err),
    }
    Ok(())
}
