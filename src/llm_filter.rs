//! Turns an agent's `llm_filter` declaration into a deduplicated list of
//! callable tools drawn from every other healthy agent in the mesh.

use semver::Version;

use crate::error::Result;
use crate::matcher::{match_tags, match_version};
use crate::model::{Agent, AgentStatus, Capability, LlmToolInfo, TagExpr};
use crate::store::Store;

/// One entry of an `llm_filter` list: either a bare capability name or an
/// object with optional tag/version constraints.
#[derive(Debug, Clone, Default)]
pub struct FilterEntry {
    pub capability: Option<String>,
    pub version: Option<String>,
    pub tags: Vec<TagExpr>,
}

#[derive(Debug, Clone)]
pub enum LlmFilter {
    Wildcard,
    Entries(Vec<FilterEntry>),
}

/// `best_match` additionally collapses same-capability candidates down to
/// the highest semver version, breaking ties by tag count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    All,
    BestMatch,
}

pub async fn resolve_llm_tools(
    store: &dyn Store,
    requester_agent_id: &str,
    filter: &LlmFilter,
    mode: FilterMode,
) -> Result<Vec<LlmToolInfo>> {
    let pool = store.list_llm_capabilities().await?;
    let eligible: Vec<(Agent, Capability)> = pool
        .into_iter()
        .filter(|(agent, _)| agent.id != requester_agent_id)
        .filter(|(agent, _)| agent.status == AgentStatus::Healthy)
        .collect();

    let candidates: Vec<(Agent, Capability)> = match filter {
        LlmFilter::Wildcard => eligible,
        LlmFilter::Entries(entries) => eligible
            .into_iter()
            .filter(|(_, cap)| entries.iter().any(|entry| entry_matches(entry, cap)))
            .collect(),
    };

    let candidates = match mode {
        FilterMode::All => candidates,
        FilterMode::BestMatch => collapse_best_match(candidates),
    };

    Ok(dedup_by_function_name(candidates))
}

fn entry_matches(entry: &FilterEntry, cap: &Capability) -> bool {
    if let Some(capability) = &entry.capability {
        if &cap.capability != capability {
            return false;
        }
    }
    if !match_version(&cap.version, entry.version.as_deref().unwrap_or("")) {
        return false;
    }
    let (matches, _) = match_tags(&cap.tags, &entry.tags, &[]);
    matches
}

/// Group by capability name, keep the candidate with the highest parseable
/// semver version; on ties (including unparseable versions) keep the one
/// with more tags. Candidates arrive in store order, which is used as the
/// final tiebreak for a deterministic result.
fn collapse_best_match(candidates: Vec<(Agent, Capability)>) -> Vec<(Agent, Capability)> {
    use std::collections::HashMap;

    let mut groups: HashMap<String, Vec<(Agent, Capability)>> = HashMap::new();
    for item in candidates {
        groups.entry(item.1.capability.clone()).or_default().push(item);
    }

    let mut out = Vec::new();
    for (_, mut group) in groups {
        group.sort_by(|a, b| {
            let av = Version::parse(&a.1.version);
            let bv = Version::parse(&b.1.version);
            match (av, bv) {
                (Ok(av), Ok(bv)) => bv.cmp(&av).then_with(|| b.1.tags.len().cmp(&a.1.tags.len())),
                (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                (Err(_), Err(_)) => b.1.tags.len().cmp(&a.1.tags.len()),
            }
        });
        if let Some(best) = group.into_iter().next() {
            out.push(best);
        }
    }
    out
}

/// Dedup by `function_name` only, first occurrence wins.
fn dedup_by_function_name(candidates: Vec<(Agent, Capability)>) -> Vec<LlmToolInfo> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for (agent, cap) in candidates {
        if !seen.insert(cap.function_name.clone()) {
            continue;
        }
        out.push(LlmToolInfo {
            name: cap.function_name.clone(),
            capability: cap.capability.clone(),
            description: cap.description.clone(),
            input_schema: cap.input_schema.clone().unwrap_or(serde_json::Value::Null),
            tags: cap.tags.clone(),
            version: cap.version.clone(),
            endpoint: agent.endpoint.clone(),
            agent_id: Some(agent.id.clone()),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AgentKind;
    use crate::store::InMemoryStore;
    use chrono::Utc;
    use serde_json::json;

    fn agent(id: &str, status: AgentStatus) -> Agent {
        let now = Utc::now();
        Agent {
            id: id.to_string(),
            name: id.to_string(),
            kind: AgentKind::LlmAgent,
            version: "1.0.0".into(),
            endpoint: format!("http://{id}:9000"),
            namespace: "default".into(),
            status,
            created_at: now,
            updated_at: now,
            last_full_refresh: now,
            total_dependencies: 0,
            dependencies_resolved: 0,
        }
    }

    fn llm_cap(agent_id: &str, function_name: &str, capability: &str, version: &str, tags: &[&str]) -> Capability {
        Capability {
            agent_id: agent_id.to_string(),
            function_name: function_name.to_string(),
            capability: capability.to_string(),
            version: version.to_string(),
            description: "does things".into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            input_schema: Some(json!({"type": "object"})),
            kwargs: None,
        }
    }

    #[tokio::test]
    async fn wildcard_excludes_requester_and_unhealthy() {
        let store = InMemoryStore::new();
        store.upsert_agent(agent("requester", AgentStatus::Healthy)).await.unwrap();
        store.upsert_agent(agent("provider", AgentStatus::Healthy)).await.unwrap();
        store.upsert_agent(agent("down", AgentStatus::Unhealthy)).await.unwrap();
        store.replace_capabilities("requester", vec![llm_cap("requester", "self_tool", "chat", "1.0.0", &[])]).await.unwrap();
        store.replace_capabilities("provider", vec![llm_cap("provider", "other_tool", "chat", "1.0.0", &[])]).await.unwrap();
        store.replace_capabilities("down", vec![llm_cap("down", "down_tool", "chat", "1.0.0", &[])]).await.unwrap();

        let tools = resolve_llm_tools(&store, "requester", &LlmFilter::Wildcard, FilterMode::All).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "other_tool");
    }

    #[tokio::test]
    async fn empty_result_is_legal() {
        let store = InMemoryStore::new();
        store.upsert_agent(agent("lonely", AgentStatus::Healthy)).await.unwrap();
        let tools = resolve_llm_tools(&store, "lonely", &LlmFilter::Wildcard, FilterMode::All).await.unwrap();
        assert!(tools.is_empty());
    }

    #[tokio::test]
    async fn dedup_keeps_first_occurrence_by_function_name() {
        let store = InMemoryStore::new();
        store.upsert_agent(agent("p1", AgentStatus::Healthy)).await.unwrap();
        store.upsert_agent(agent("p2", AgentStatus::Healthy)).await.unwrap();
        store.replace_capabilities("p1", vec![llm_cap("p1", "shared_name", "chat", "1.0.0", &[])]).await.unwrap();
        store.replace_capabilities("p2", vec![llm_cap("p2", "shared_name", "search", "1.0.0", &[])]).await.unwrap();

        let tools = resolve_llm_tools(&store, "requester", &LlmFilter::Wildcard, FilterMode::All).await.unwrap();
        assert_eq!(tools.len(), 1);
    }

    #[tokio::test]
    async fn best_match_keeps_highest_semver_per_capability() {
        let store = InMemoryStore::new();
        store.upsert_agent(agent("p1", AgentStatus::Healthy)).await.unwrap();
        store.upsert_agent(agent("p2", AgentStatus::Healthy)).await.unwrap();
        store.replace_capabilities("p1", vec![llm_cap("p1", "chat_v1", "chat", "1.0.0", &[])]).await.unwrap();
        store.replace_capabilities("p2", vec![llm_cap("p2", "chat_v2", "chat", "2.0.0", &[])]).await.unwrap();

        let tools = resolve_llm_tools(&store, "requester", &LlmFilter::Wildcard, FilterMode::BestMatch).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "chat_v2");
    }

    #[tokio::test]
    async fn best_match_ties_break_on_tag_count() {
        let store = InMemoryStore::new();
        store.upsert_agent(agent("p1", AgentStatus::Healthy)).await.unwrap();
        store.upsert_agent(agent("p2", AgentStatus::Healthy)).await.unwrap();
        store.replace_capabilities("p1", vec![llm_cap("p1", "chat_few_tags", "chat", "1.0.0", &["a"])]).await.unwrap();
        store.replace_capabilities("p2", vec![llm_cap("p2", "chat_many_tags", "chat", "1.0.0", &["a", "b"])]).await.unwrap();

        let tools = resolve_llm_tools(&store, "requester", &LlmFilter::Wildcard, FilterMode::BestMatch).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "chat_many_tags");
    }

    #[tokio::test]
    async fn entry_filter_matches_by_capability_name() {
        let store = InMemoryStore::new();
        store.upsert_agent(agent("p1", AgentStatus::Healthy)).await.unwrap();
        store.replace_capabilities("p1", vec![
            llm_cap("p1", "chat_tool", "chat", "1.0.0", &[]),
            llm_cap("p1", "search_tool", "search", "1.0.0", &[]),
        ]).await.unwrap();

        let filter = LlmFilter::Entries(vec![FilterEntry { capability: Some("chat".into()), ..Default::default() }]);
        let tools = resolve_llm_tools(&store, "requester", &filter, FilterMode::All).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "chat_tool");
    }
}
