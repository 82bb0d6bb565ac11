//! Core data model: agents, capabilities, dependencies, and the event log.
//!
//! These types are shared by every other module; nothing in this
//! module talks to the store or the network.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of agent registered with the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    #[default]
    #[serde(rename = "mcp_agent")]
    ToolAgent,
    #[serde(rename = "api")]
    ApiService,
    LlmAgent,
}

impl AgentKind {
    /// Whether this kind emits lifecycle events. API services are
    /// registered and resolved like any other agent but stay silent.
    pub fn emits_events(&self) -> bool {
        !matches!(self, AgentKind::ApiService)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::ToolAgent => "mcp_agent",
            AgentKind::ApiService => "api",
            AgentKind::LlmAgent => "llm_agent",
        }
    }
}

/// Health state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Healthy => "healthy",
            AgentStatus::Unhealthy => "unhealthy",
            AgentStatus::Unknown => "unknown",
        }
    }
}

/// The root entity: a process registered with the mesh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub kind: AgentKind,
    pub version: String,
    pub endpoint: String,
    pub namespace: String,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_full_refresh: DateTime<Utc>,
    /// Sum of declared dependencies across the last full heartbeat's tools.
    #[serde(default)]
    pub total_dependencies: usize,
    /// Count of non-placeholder entries in the last full heartbeat's
    /// resolution response.
    #[serde(default)]
    pub dependencies_resolved: usize,
}

/// A named, versioned, tagged function exposed by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub agent_id: String,
    pub function_name: String,
    pub capability: String,
    pub version: String,
    pub description: String,
    pub tags: Vec<String>,
    pub input_schema: Option<Value>,
    pub kwargs: Option<Value>,
}

impl Capability {
    /// Whether this capability is callable by LLM agents.
    pub fn is_llm_callable(&self) -> bool {
        self.input_schema.is_some()
    }

    /// `vendor` kwarg, defaulting to `"unknown"`.
    pub fn vendor(&self) -> String {
        self.kwargs
            .as_ref()
            .and_then(|k| k.get("vendor"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string()
    }
}

/// A single tag requirement, classified by its operator prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagExpr {
    /// `-x`: hard-fails if present.
    Excluded(String),
    /// `+x`: scores if present, never fails.
    Preferred(String),
    /// `x`: hard-fails if absent, scores if present.
    Required(String),
}

impl TagExpr {
    /// Parse a raw tag string into its operator form. Returns `None` for
    /// an empty tag (after stripping the prefix), which callers ignore.
    pub fn parse(raw: &str) -> Option<Self> {
        let (rest, expr): (&str, fn(String) -> TagExpr) = if let Some(rest) = raw.strip_prefix('-')
        {
            (rest, TagExpr::Excluded)
        } else if let Some(rest) = raw.strip_prefix('+') {
            (rest, TagExpr::Preferred)
        } else {
            (raw, TagExpr::Required)
        };
        if rest.is_empty() {
            None
        } else {
            Some(expr(rest.to_string()))
        }
    }
}

/// A consumer-declared requirement, carried inside heartbeat payloads and
/// recomputed at each resolution (never persisted as a first-class row).
#[derive(Debug, Clone, Default)]
pub struct DependencySpec {
    pub capability: String,
    pub version: Option<String>,
    pub required: Vec<TagExpr>,
    pub or_groups: Vec<Vec<TagExpr>>,
    pub namespace: Option<String>,
}

/// Status of a dependency resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStatus {
    Resolved,
    Unresolved,
}

/// One entry in a resolved-dependency list; positional index is preserved
/// by the caller even when `status` is `Unresolved`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedDep {
    pub agent_id: Option<String>,
    pub function_name: Option<String>,
    pub capability: String,
    pub endpoint: Option<String>,
    pub status: ResolutionStatus,
}

impl ResolvedDep {
    pub fn unresolved(capability: String) -> Self {
        Self {
            agent_id: None,
            function_name: None,
            capability,
            endpoint: None,
            status: ResolutionStatus::Unresolved,
        }
    }
}

/// Result of resolving an `llm_provider` spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedLlmProvider {
    pub agent_id: String,
    pub name: String,
    pub capability: String,
    pub endpoint: String,
    pub status: &'static str,
    pub vendor: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kwargs: Option<Value>,
}

/// A tool made available to an LLM agent by the tool filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmToolInfo {
    pub name: String,
    pub capability: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub version: String,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// Append-only audit/notification log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Register,
    Heartbeat,
    Update,
    Unregister,
    Unhealthy,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Register => "register",
            EventType::Heartbeat => "heartbeat",
            EventType::Update => "update",
            EventType::Unregister => "unregister",
            EventType::Unhealthy => "unhealthy",
        }
    }

    /// Whether this event type counts toward the topology-change predicate
    /// used by fast heartbeats. Same-status heartbeats are excluded so
    /// idle consumers don't churn.
    pub fn affects_topology(&self) -> bool {
        !matches!(self, EventType::Heartbeat)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEvent {
    pub id: u64,
    pub event_type: EventType,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: HashMap<String, Value>,
}
