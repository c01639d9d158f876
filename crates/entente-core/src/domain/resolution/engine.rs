//! Resolution engine
//!
//! Drives conflicts through their lifecycle. Automatic resolution tries AI
//! suggestions, then deterministic rules, and finally hands the conflict to
//! an expert. Manual resolution, assignment, rejection and escalation are
//! permission-checked.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::config::ResolutionConfig;
use crate::domain::access::{Permission, PermissionChecker, Role};
use crate::domain::conflict::{
    AI_SYSTEM, Conflict, ConflictFilter, ConflictRepository, ConflictStatus, ConflictSubject,
    Resolution, ResolutionMethod,
};
use crate::domain::knowledge::KnowledgeGraphRepository;
use crate::domain::locking::EntityLockManager;
use crate::domain::merge::{ActionPayload, EntityMerger, MergeStrategy};
use crate::domain::providers::SuggestionProvider;
use crate::error::{Error, Result};

use super::prompt::{PromptContext, build_user_prompt, parse_suggestions, system_prompt};
use super::rules::rule_based_resolution;
use super::suggestions::{
    ResolutionOutcome, ResolutionPath, ResolutionSuggestion, SuggestedMethod, SuggestionSource,
};

/// A resolution chosen by an expert
#[derive(Debug, Clone, PartialEq)]
pub struct ManualResolution {
    pub method: ResolutionMethod,
    pub reasoning: String,
    pub actions: Map<String, Value>,
    pub confidence: Option<f32>,
}

impl ManualResolution {
    pub fn new(method: ResolutionMethod, reasoning: impl Into<String>) -> Self {
        Self {
            method,
            reasoning: reasoning.into(),
            actions: Map::new(),
            confidence: None,
        }
    }

    pub fn with_actions(mut self, actions: Map<String, Value>) -> Self {
        self.actions = actions;
        self
    }
}

/// Method, rationale and parameters about to be applied
struct Plan<'a> {
    method: ResolutionMethod,
    reasoning: &'a str,
    actions: &'a Map<String, Value>,
    confidence: Option<f32>,
}

/// Conflict resolution service
pub struct ResolutionEngine {
    knowledge: Arc<dyn KnowledgeGraphRepository>,
    conflicts: Arc<dyn ConflictRepository>,
    permissions: Arc<dyn PermissionChecker>,
    merger: EntityMerger,
    suggestions: Option<Arc<dyn SuggestionProvider>>,
    config: ResolutionConfig,
}

impl ResolutionEngine {
    /// Create an engine without a suggestion provider
    pub fn new(
        knowledge: Arc<dyn KnowledgeGraphRepository>,
        conflicts: Arc<dyn ConflictRepository>,
        permissions: Arc<dyn PermissionChecker>,
        locks: Arc<EntityLockManager>,
        config: ResolutionConfig,
    ) -> Self {
        let merger = EntityMerger::new(knowledge.clone(), conflicts.clone(), locks);
        Self {
            knowledge,
            conflicts,
            permissions,
            merger,
            suggestions: None,
            config,
        }
    }

    /// Attach an AI suggestion provider
    pub fn with_suggestions(mut self, provider: Arc<dyn SuggestionProvider>) -> Self {
        self.suggestions = Some(provider);
        self
    }

    /// The merger used to apply actions
    pub fn merger(&self) -> &EntityMerger {
        &self.merger
    }

    /// Resolve without a human
    ///
    /// Applies the best AI suggestion at or above `confidence_threshold`
    /// (default from config), else a deterministic rule, else assigns the
    /// conflict to an expert and reports `assigned_for_review`.
    pub async fn resolve_automatically(
        &self,
        conflict_id: &str,
        use_ai: bool,
        confidence_threshold: Option<f32>,
    ) -> Result<ResolutionOutcome> {
        let conflict = self.conflicts.require_conflict(conflict_id).await?;
        if !matches!(
            conflict.status,
            ConflictStatus::Detected | ConflictStatus::UnderReview
        ) {
            return Err(Error::InvalidTransition {
                conflict_id: conflict.id.clone(),
                from: conflict.status.to_string(),
                to: ConflictStatus::ResolvedAuto.to_string(),
            });
        }

        let threshold = confidence_threshold.unwrap_or(self.config.ai_confidence_threshold);

        if use_ai {
            if self.suggestions.is_some() {
                let suggestions = self.suggest_resolutions(conflict_id).await?;
                let best = suggestions
                    .iter()
                    .filter(|s| s.source != SuggestionSource::Fallback)
                    .filter(|s| s.resolution_method.is_auto_applicable())
                    .filter(|s| s.confidence >= threshold)
                    .find_map(|s| s.resolution_method.method().map(|m| (m, s)));

                if let Some((method, suggestion)) = best {
                    info!(
                        conflict_id,
                        method = %method,
                        confidence = suggestion.confidence,
                        "Applying AI suggestion"
                    );
                    let plan = Plan {
                        method,
                        reasoning: &suggestion.reasoning,
                        actions: &suggestion.actions,
                        confidence: Some(suggestion.confidence),
                    };
                    return self
                        .apply_and_record(conflict, plan, AI_SYSTEM, ConflictStatus::ResolvedAuto, ResolutionPath::Ai)
                        .await;
                }
                debug!(conflict_id, threshold, "No AI suggestion met the threshold");
            } else {
                warn!(conflict_id, "AI resolution requested but no suggestion provider is configured");
            }
        }

        if let Some(decision) = rule_based_resolution(&conflict, &self.config) {
            info!(conflict_id, method = %decision.method, "Applying rule-based resolution");
            let plan = Plan {
                method: decision.method,
                reasoning: &decision.reasoning,
                actions: &decision.actions,
                confidence: Some(conflict.confidence_score),
            };
            return self
                .apply_and_record(conflict, plan, AI_SYSTEM, ConflictStatus::ResolvedAuto, ResolutionPath::Rule)
                .await;
        }

        self.assign_for_review(conflict).await
    }

    /// Apply an expert's resolution
    pub async fn resolve_conflict_manually(
        &self,
        conflict_id: &str,
        resolution: ManualResolution,
        expert_id: &str,
    ) -> Result<ResolutionOutcome> {
        self.permissions
            .require_any_role(expert_id, &[Role::Expert, Role::Admin], "resolve conflicts")
            .await?;

        let effective = effective_method(resolution.method, &resolution.actions)?;
        if effective == ResolutionMethod::ManualEdit {
            self.permissions
                .require_permission(expert_id, Permission::EditGraph)
                .await?;
        }

        let conflict = self.conflicts.require_conflict(conflict_id).await?;
        if !conflict.status.can_transition_to(ConflictStatus::ResolvedManual) {
            return Err(Error::InvalidTransition {
                conflict_id: conflict.id.clone(),
                from: conflict.status.to_string(),
                to: ConflictStatus::ResolvedManual.to_string(),
            });
        }

        let plan = Plan {
            method: resolution.method,
            reasoning: &resolution.reasoning,
            actions: &resolution.actions,
            confidence: resolution.confidence,
        };
        self.apply_and_record(conflict, plan, expert_id, ConflictStatus::ResolvedManual, ResolutionPath::Manual)
            .await
    }

    /// Candidate resolutions for preview, best first
    ///
    /// With a provider this asks the model and never fails on its output.
    /// Without one it returns the rule decision, or a manual-review hand-off.
    pub async fn suggest_resolutions(&self, conflict_id: &str) -> Result<Vec<ResolutionSuggestion>> {
        let conflict = self.conflicts.require_conflict(conflict_id).await?;

        let Some(provider) = &self.suggestions else {
            let suggestion = match rule_based_resolution(&conflict, &self.config) {
                Some(decision) => ResolutionSuggestion {
                    resolution_method: SuggestedMethod::Resolve(decision.method),
                    reasoning: decision.reasoning,
                    confidence: conflict.confidence_score,
                    actions: decision.actions,
                    source: SuggestionSource::Rule,
                },
                None => ResolutionSuggestion::manual_review("No rule applies to this conflict"),
            };
            return Ok(vec![suggestion]);
        };

        let context = self.prompt_context(&conflict).await?;
        let user_prompt = build_user_prompt(&conflict, &context);
        let response = match provider.complete(&system_prompt(), &user_prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!(conflict_id, error = %e, "Suggestion provider failed");
                String::new()
            }
        };

        let suggestions = parse_suggestions(&response, self.config.max_ai_suggestions);
        debug!(conflict_id, count = suggestions.len(), "Parsed resolution suggestions");
        Ok(suggestions)
    }

    /// Assign a conflict to an expert for review
    pub async fn assign_conflict(
        &self,
        conflict_id: &str,
        expert_id: &str,
        assigned_by: &str,
    ) -> Result<Conflict> {
        self.permissions
            .require_permission(assigned_by, Permission::ManageConflicts)
            .await?;

        let mut conflict = self.conflicts.require_conflict(conflict_id).await?;
        conflict.assign(Some(expert_id))?;
        self.conflicts.save_conflict(&conflict).await?;

        info!(conflict_id, expert_id, assigned_by, "Assigned conflict");
        Ok(conflict)
    }

    /// Dismiss a conflict as not a real inconsistency
    pub async fn reject_conflict(&self, conflict_id: &str, admin_id: &str, reason: &str) -> Result<Conflict> {
        self.administrative_transition(conflict_id, admin_id, reason, ConflictStatus::Rejected, "rejection")
            .await
    }

    /// Raise a conflict beyond ordinary review
    pub async fn escalate_conflict(&self, conflict_id: &str, user_id: &str, reason: &str) -> Result<Conflict> {
        self.administrative_transition(conflict_id, user_id, reason, ConflictStatus::Escalated, "escalation")
            .await
    }

    async fn administrative_transition(
        &self,
        conflict_id: &str,
        user_id: &str,
        reason: &str,
        status: ConflictStatus,
        record_key: &str,
    ) -> Result<Conflict> {
        self.permissions
            .require_permission(user_id, Permission::ManageConflicts)
            .await?;

        let mut conflict = self.conflicts.require_conflict(conflict_id).await?;
        conflict.transition_to(status)?;
        conflict.context_data.get_or_insert_with(Map::new).insert(
            record_key.to_string(),
            json!({"by": user_id, "reason": reason, "at": Utc::now().to_rfc3339()}),
        );
        self.conflicts.save_conflict(&conflict).await?;

        info!(conflict_id, user_id, status = %status, reason, "Conflict status changed");
        Ok(conflict)
    }

    /// Least-loaded expert from the configured pool
    async fn pick_expert(&self) -> Result<Option<String>> {
        let mut best: Option<(u64, &String)> = None;
        for expert in &self.config.expert_pool {
            let load = self
                .conflicts
                .count_conflicts(
                    &ConflictFilter::new()
                        .with_status(ConflictStatus::UnderReview)
                        .assigned_to(expert.clone()),
                )
                .await?;
            if best.is_none_or(|(min, _)| load < min) {
                best = Some((load, expert));
            }
        }
        Ok(best.map(|(_, expert)| expert.clone()))
    }

    async fn assign_for_review(&self, mut conflict: Conflict) -> Result<ResolutionOutcome> {
        let expert = self.pick_expert().await?;
        conflict.assign(expert.as_deref())?;
        self.conflicts.save_conflict(&conflict).await?;

        info!(
            conflict_id = %conflict.id,
            expert = expert.as_deref().unwrap_or("unassigned"),
            "Automatic resolution declined, conflict sent for expert review"
        );

        Ok(ResolutionOutcome {
            conflict_id: conflict.id,
            success: false,
            assigned_for_review: true,
            assigned_to: expert,
            method: None,
            path: Some(ResolutionPath::ExpertReview),
            status: conflict.status,
            data: Map::new(),
            error: None,
        })
    }

    async fn apply_and_record(
        &self,
        mut conflict: Conflict,
        plan: Plan<'_>,
        resolved_by: &str,
        status: ConflictStatus,
        path: ResolutionPath,
    ) -> Result<ResolutionOutcome> {
        let payload = match self.apply(&conflict, &plan).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    conflict_id = %conflict.id,
                    method = %plan.method,
                    error = %e,
                    "Resolution action failed, conflict left open"
                );
                return Ok(ResolutionOutcome {
                    conflict_id: conflict.id,
                    success: false,
                    assigned_for_review: false,
                    assigned_to: conflict.assigned_to,
                    method: Some(plan.method),
                    path: Some(path),
                    status: conflict.status,
                    data: Map::new(),
                    error: Some(e.to_string()),
                });
            }
        };

        let mut resolution_data = plan.actions.clone();
        resolution_data.insert("action_result".into(), Value::Object(payload.clone()));

        conflict.resolve(
            Resolution {
                resolution_method: plan.method,
                resolution_data,
                reasoning: plan.reasoning.to_string(),
                confidence_score: plan.confidence,
                resolved_by: resolved_by.to_string(),
                resolution_timestamp: Utc::now(),
            },
            status,
        )?;
        self.conflicts.save_conflict(&conflict).await?;

        info!(
            conflict_id = %conflict.id,
            method = %plan.method,
            resolved_by,
            status = %conflict.status,
            "Conflict resolved"
        );

        Ok(ResolutionOutcome {
            conflict_id: conflict.id,
            success: true,
            assigned_for_review: false,
            assigned_to: conflict.assigned_to,
            method: Some(plan.method),
            path: Some(path),
            status: conflict.status,
            data: payload,
            error: None,
        })
    }

    /// Dispatch a method onto the conflict's subject
    async fn apply(&self, conflict: &Conflict, plan: &Plan<'_>) -> Result<ActionPayload> {
        let method = effective_method(plan.method, plan.actions)?;
        let actions = plan.actions;
        let id = conflict.id.as_str();

        match &conflict.subject {
            ConflictSubject::Entities {
                source_entity_id: source,
                target_entity_id: target,
            } => match method {
                ResolutionMethod::MergeEntities => {
                    let strategy = match actions.get("merge_strategy").and_then(Value::as_str) {
                        Some(s) => MergeStrategy::parse(s).ok_or_else(|| {
                            Error::InvalidInput(format!("unknown merge strategy '{}'", s))
                        })?,
                        None => MergeStrategy::default(),
                    };
                    self.merger.merge_entities(id, source, target, strategy).await
                }
                ResolutionMethod::KeepBoth => {
                    let note = actions
                        .get("disambiguation_note")
                        .and_then(Value::as_str)
                        .unwrap_or(plan.reasoning);
                    self.merger.keep_both(id, source, target, note).await
                }
                ResolutionMethod::KeepSource => {
                    self.merger
                        .keep_entity(id, "keep_source", source, target, transfer_flag(actions))
                        .await
                }
                ResolutionMethod::KeepTarget => {
                    self.merger
                        .keep_entity(id, "keep_target", target, source, transfer_flag(actions))
                        .await
                }
                ResolutionMethod::CreateNew => {
                    let text = actions.get("text").and_then(Value::as_str);
                    let overrides = actions.get("properties").and_then(Value::as_object);
                    self.merger.create_new(id, source, target, text, overrides).await
                }
                ResolutionMethod::DeleteConflicting => {
                    let a = self.knowledge.require_entity(source).await?;
                    let b = self.knowledge.require_entity(target).await?;
                    let (winner, loser) = if b.confidence > a.confidence {
                        (target, source)
                    } else {
                        (source, target)
                    };
                    self.merger
                        .keep_entity(id, "delete_conflicting", winner, loser, transfer_flag(actions))
                        .await
                }
                ResolutionMethod::TemporalOrdering => {
                    let a = self.knowledge.require_entity(source).await?;
                    let b = self.knowledge.require_entity(target).await?;
                    let (winner, loser) = if b.updated_at > a.updated_at {
                        (target, source)
                    } else {
                        (source, target)
                    };
                    self.merger
                        .keep_entity(id, "temporal_ordering", winner, loser, transfer_flag(actions))
                        .await
                }
                ResolutionMethod::SourcePrioritization => {
                    let a = self.knowledge.require_entity(source).await?;
                    let b = self.knowledge.require_entity(target).await?;
                    let a_reliability = self.merger.source_reliability(&a).await?;
                    let b_reliability = self.merger.source_reliability(&b).await?;
                    let (winner, loser) = if b_reliability > a_reliability {
                        (target, source)
                    } else {
                        (source, target)
                    };
                    self.merger
                        .keep_entity(id, "source_prioritization", winner, loser, transfer_flag(actions))
                        .await
                }
                ResolutionMethod::ManualEdit => {
                    let updates = required_object(actions, "entity_updates")?;
                    self.merger
                        .apply_entity_updates(id, &[source.as_str(), target.as_str()], updates)
                        .await
                }
                ResolutionMethod::AiResolution => Err(nested_delegation()),
            },
            ConflictSubject::Relationships {
                source_relationship_id: source,
                target_relationship_id: target,
            } => match method {
                ResolutionMethod::MergeEntities | ResolutionMethod::CreateNew => {
                    Err(Error::InvalidInput(format!(
                        "'{}' applies to entity conflicts only",
                        method
                    )))
                }
                ResolutionMethod::KeepBoth => {
                    self.knowledge.require_relationship(source).await?;
                    self.knowledge.require_relationship(target).await?;
                    let mut payload = Map::new();
                    payload.insert("action".into(), json!("keep_both"));
                    payload.insert("success".into(), json!(true));
                    payload.insert("relationship_ids".into(), json!([source, target]));
                    Ok(payload)
                }
                ResolutionMethod::KeepSource => {
                    self.merger
                        .deactivate_relationship(id, "keep_source", source, target)
                        .await
                }
                ResolutionMethod::KeepTarget => {
                    self.merger
                        .deactivate_relationship(id, "keep_target", target, source)
                        .await
                }
                ResolutionMethod::DeleteConflicting | ResolutionMethod::SourcePrioritization => {
                    let a = self.knowledge.require_relationship(source).await?;
                    let b = self.knowledge.require_relationship(target).await?;
                    let (winner, loser) = if b.confidence > a.confidence {
                        (target, source)
                    } else {
                        (source, target)
                    };
                    self.merger
                        .deactivate_relationship(id, method.as_str(), winner, loser)
                        .await
                }
                ResolutionMethod::TemporalOrdering => {
                    let a = self.knowledge.require_relationship(source).await?;
                    let b = self.knowledge.require_relationship(target).await?;
                    let (winner, loser) = if b.updated_at > a.updated_at {
                        (target, source)
                    } else {
                        (source, target)
                    };
                    self.merger
                        .deactivate_relationship(id, "temporal_ordering", winner, loser)
                        .await
                }
                ResolutionMethod::ManualEdit => {
                    let updates = required_object(actions, "relationship_updates")?;
                    self.merger
                        .apply_relationship_updates(id, &[source.as_str(), target.as_str()], updates)
                        .await
                }
                ResolutionMethod::AiResolution => Err(nested_delegation()),
            },
        }
    }

    /// Records shown to the suggestion provider
    async fn prompt_context(&self, conflict: &Conflict) -> Result<PromptContext> {
        let mut context = PromptContext::default();
        let mut entity_ids: Vec<String> = Vec::new();

        match &conflict.subject {
            ConflictSubject::Entities {
                source_entity_id,
                target_entity_id,
            } => {
                entity_ids.push(source_entity_id.clone());
                entity_ids.push(target_entity_id.clone());
                let mut seen = HashSet::new();
                for id in &entity_ids {
                    for rel in self.knowledge.list_relationships_for_entity(id, true).await? {
                        if seen.insert(rel.id.clone()) {
                            context.relationships.push(rel);
                        }
                    }
                }
            }
            ConflictSubject::Relationships {
                source_relationship_id,
                target_relationship_id,
            } => {
                for id in [source_relationship_id, target_relationship_id] {
                    if let Some(rel) = self.knowledge.get_relationship(id).await? {
                        for endpoint in [&rel.source_entity_id, &rel.target_entity_id] {
                            if !entity_ids.contains(endpoint) {
                                entity_ids.push(endpoint.clone());
                            }
                        }
                        context.relationships.push(rel);
                    }
                }
            }
        }

        let mut documents = HashSet::new();
        for id in &entity_ids {
            if let Some(entity) = self.knowledge.get_entity(id).await? {
                if let Some(document_id) = &entity.source_document_id
                    && documents.insert(document_id.clone())
                    && let Some(document) = self.knowledge.get_document(document_id).await?
                {
                    context.documents.push(document);
                }
                context.entities.push(entity);
            }
        }

        Ok(context)
    }
}

/// Unwrap `ai_resolution` to the method named in `actions.action`
fn effective_method(method: ResolutionMethod, actions: &Map<String, Value>) -> Result<ResolutionMethod> {
    if method != ResolutionMethod::AiResolution {
        return Ok(method);
    }
    let name = actions
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidInput("ai_resolution requires actions.action".to_string()))?;
    match ResolutionMethod::parse(name) {
        Some(ResolutionMethod::AiResolution) => Err(nested_delegation()),
        Some(inner) => Ok(inner),
        None => Err(Error::InvalidInput(format!("unknown resolution method '{}'", name))),
    }
}

fn nested_delegation() -> Error {
    Error::InvalidInput("ai_resolution cannot delegate to itself".to_string())
}

fn transfer_flag(actions: &Map<String, Value>) -> bool {
    actions
        .get("transfer_relationships")
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

fn required_object<'a>(actions: &'a Map<String, Value>, key: &str) -> Result<&'a Map<String, Value>> {
    actions
        .get(key)
        .and_then(Value::as_object)
        .ok_or_else(|| Error::InvalidInput(format!("manual_edit requires an '{}' object", key)))
}
