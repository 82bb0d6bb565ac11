//! Dependency and LLM-provider resolution against the store's candidates.

use crate::matcher::{match_tags, match_version};
use crate::model::{Agent, AgentStatus, Capability, DependencySpec, ResolutionStatus, ResolvedDep, ResolvedLlmProvider};
use crate::store::Store;

/// Resolve one dependency spec against every candidate the store returns
/// for `spec.capability`, preserving the positional contract: callers get
/// exactly one `ResolvedDep` per spec, a placeholder when nothing matches.
pub async fn resolve_dependency(store: &dyn Store, spec: &DependencySpec) -> crate::error::Result<ResolvedDep> {
    let candidates = store.find_providers(&spec.capability).await?;
    let best = best_candidate(candidates, spec);

    Ok(match best {
        Some((agent, cap)) => ResolvedDep {
            agent_id: Some(agent.id.clone()),
            function_name: Some(cap.function_name.clone()),
            capability: spec.capability.clone(),
            endpoint: Some(agent.endpoint.clone()),
            status: ResolutionStatus::Resolved,
        },
        None => ResolvedDep::unresolved(spec.capability.clone()),
    })
}

/// Resolve a whole positional list, preserving length and order.
pub async fn resolve_dependencies(
    store: &dyn Store,
    specs: &[DependencySpec],
) -> crate::error::Result<Vec<ResolvedDep>> {
    let mut out = Vec::with_capacity(specs.len());
    for spec in specs {
        out.push(resolve_dependency(store, spec).await?);
    }
    Ok(out)
}

/// Filter candidates to healthy owners in the requested namespace, matching
/// version and tags, and pick the highest-scoring one. Ties keep the
/// store's insertion order since `find_providers` already returns
/// candidates in that order and this is a stable sort.
fn best_candidate(
    candidates: Vec<(Agent, Capability)>,
    spec: &DependencySpec,
) -> Option<(Agent, Capability)> {
    let mut scored: Vec<(i64, (Agent, Capability))> = candidates
        .into_iter()
        .filter(|(agent, _)| agent.status == AgentStatus::Healthy)
        .filter(|(agent, _)| match &spec.namespace {
            Some(ns) => &agent.namespace == ns,
            None => true,
        })
        .filter(|(_, cap)| match_version(&cap.version, spec.version.as_deref().unwrap_or("")))
        .filter_map(|(agent, cap)| {
            let (matches, score) = match_tags(&cap.tags, &spec.required, &spec.or_groups);
            matches.then_some((score, (agent, cap)))
        })
        .collect();

    // stable sort keeps original (insertion) order among equal scores
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().next().map(|(_, pair)| pair)
}

/// Resolve an `llm_provider` spec to at most one provider. Only
/// LLM-callable capabilities (non-null `input_schema`) are eligible.
pub async fn resolve_llm_provider(
    store: &dyn Store,
    spec: &DependencySpec,
) -> crate::error::Result<Option<ResolvedLlmProvider>> {
    let candidates = store.find_providers(&spec.capability).await?;
    let llm_candidates = candidates.into_iter().filter(|(_, cap)| cap.is_llm_callable()).collect();

    Ok(best_candidate(llm_candidates, spec).map(|(agent, cap)| ResolvedLlmProvider {
        agent_id: agent.id,
        name: cap.function_name,
        capability: cap.capability,
        endpoint: agent.endpoint,
        status: "available",
        vendor: cap.vendor(),
        tags: cap.tags,
        version: cap.version,
        kwargs: cap.kwargs,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentKind, TagExpr};
    use crate::store::InMemoryStore;
    use chrono::Utc;
    use serde_json::json;

    fn agent(id: &str, status: AgentStatus, ns: &str) -> Agent {
        let now = Utc::now();
        Agent {
            id: id.to_string(),
            name: id.to_string(),
            kind: AgentKind::ToolAgent,
            version: "1.0.0".into(),
            endpoint: format!("http://{id}:9000"),
            namespace: ns.to_string(),
            status,
            created_at: now,
            updated_at: now,
            last_full_refresh: now,
            total_dependencies: 0,
            dependencies_resolved: 0,
        }
    }

    fn cap(agent_id: &str, capability: &str, version: &str, tags: &[&str], llm: bool) -> Capability {
        Capability {
            agent_id: agent_id.to_string(),
            function_name: format!("{agent_id}_{capability}"),
            capability: capability.to_string(),
            version: version.to_string(),
            description: String::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            input_schema: llm.then(|| json!({"type": "object"})),
            kwargs: None,
        }
    }

    #[tokio::test]
    async fn unresolved_placeholder_when_no_provider() {
        let store = InMemoryStore::new();
        let spec = DependencySpec {
            capability: "translate".into(),
            ..Default::default()
        };
        let resolved = resolve_dependency(&store, &spec).await.unwrap();
        assert_eq!(resolved.status, ResolutionStatus::Unresolved);
        assert_eq!(resolved.capability, "translate");
    }

    #[tokio::test]
    async fn unhealthy_providers_are_excluded() {
        let store = InMemoryStore::new();
        store.upsert_agent(agent("a1", AgentStatus::Unhealthy, "default")).await.unwrap();
        store
            .replace_capabilities("a1", vec![cap("a1", "translate", "1.0.0", &[], false)])
            .await
            .unwrap();

        let spec = DependencySpec {
            capability: "translate".into(),
            ..Default::default()
        };
        let resolved = resolve_dependency(&store, &spec).await.unwrap();
        assert_eq!(resolved.status, ResolutionStatus::Unresolved);
    }

    #[tokio::test]
    async fn version_constraint_picks_matching_candidate() {
        let store = InMemoryStore::new();
        for (id, version) in [("a1", "0.9.0"), ("a2", "1.0.0"), ("a3", "1.5.0"), ("a4", "2.0.0")] {
            store.upsert_agent(agent(id, AgentStatus::Healthy, "default")).await.unwrap();
            store
                .replace_capabilities(id, vec![cap(id, "cache_service", version, &[], false)])
                .await
                .unwrap();
        }

        let spec = DependencySpec {
            capability: "cache_service".into(),
            version: Some(">=1.0.0,<2.0.0".into()),
            ..Default::default()
        };
        let resolved = resolve_dependency(&store, &spec).await.unwrap();
        assert_eq!(resolved.status, ResolutionStatus::Resolved);
        assert!(matches!(resolved.agent_id.as_deref(), Some("a2") | Some("a3")));
    }

    #[tokio::test]
    async fn positional_list_preserves_length_with_placeholders() {
        let store = InMemoryStore::new();
        store.upsert_agent(agent("a1", AgentStatus::Healthy, "default")).await.unwrap();
        store
            .replace_capabilities("a1", vec![cap("a1", "translate", "1.0.0", &[], false)])
            .await
            .unwrap();

        let specs = vec![
            DependencySpec { capability: "translate".into(), ..Default::default() },
            DependencySpec { capability: "summarize".into(), ..Default::default() },
        ];
        let resolved = resolve_dependencies(&store, &specs).await.unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].status, ResolutionStatus::Resolved);
        assert_eq!(resolved[1].status, ResolutionStatus::Unresolved);
    }

    #[tokio::test]
    async fn namespace_filter_excludes_other_namespaces() {
        let store = InMemoryStore::new();
        store.upsert_agent(agent("a1", AgentStatus::Healthy, "staging")).await.unwrap();
        store
            .replace_capabilities("a1", vec![cap("a1", "translate", "1.0.0", &[], false)])
            .await
            .unwrap();

        let spec = DependencySpec {
            capability: "translate".into(),
            namespace: Some("default".into()),
            ..Default::default()
        };
        let resolved = resolve_dependency(&store, &spec).await.unwrap();
        assert_eq!(resolved.status, ResolutionStatus::Unresolved);
    }

    #[tokio::test]
    async fn llm_provider_resolution_requires_input_schema() {
        let store = InMemoryStore::new();
        store.upsert_agent(agent("a1", AgentStatus::Healthy, "default")).await.unwrap();
        store
            .replace_capabilities("a1", vec![cap("a1", "chat", "1.0.0", &["opus"], false)])
            .await
            .unwrap();

        let spec = DependencySpec { capability: "chat".into(), ..Default::default() };
        assert!(resolve_llm_provider(&store, &spec).await.unwrap().is_none());

        store
            .replace_capabilities("a1", vec![cap("a1", "chat", "1.0.0", &["opus"], true)])
            .await
            .unwrap();
        let provider = resolve_llm_provider(&store, &spec).await.unwrap().unwrap();
        assert_eq!(provider.agent_id, "a1");
        assert_eq!(provider.vendor, "unknown");
    }

    #[tokio::test]
    async fn tag_scoring_breaks_ties_toward_preferred() {
        let store = InMemoryStore::new();
        store.upsert_agent(agent("a1", AgentStatus::Healthy, "default")).await.unwrap();
        store.upsert_agent(agent("a2", AgentStatus::Healthy, "default")).await.unwrap();
        store
            .replace_capabilities("a1", vec![cap("a1", "chat", "1.0.0", &["claude", "sonnet"], false)])
            .await
            .unwrap();
        store
            .replace_capabilities("a2", vec![cap("a2", "chat", "1.0.0", &["claude", "opus"], false)])
            .await
            .unwrap();

        let spec = DependencySpec {
            capability: "chat".into(),
            required: vec![TagExpr::Required("claude".into()), TagExpr::Preferred("opus".into())],
            ..Default::default()
        };
        let resolved = resolve_dependency(&store, &spec).await.unwrap();
        assert_eq!(resolved.agent_id.as_deref(), Some("a2"));
    }
}
