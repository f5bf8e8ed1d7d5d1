//! Policy engine: ordered evaluation, field extraction, actuation.
//!
//! Policies evaluate in ascending priority and the first match wins
//! unconditionally: its extraction and action list decide the document's
//! outcome even when actions fail. No match routes the document to manual
//! review with a synthetic note.

use std::env;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use docflow_core::{defaults, ChatOptions, LanguageModelService, Policy, TraceStep};

use crate::actions::{ActionContext, ActionOutcome, ActionRunner};
use crate::conditions::{policy_matches, DocumentView};
use crate::extract::{extract_policy_fields, missing_required_fields};
use crate::variables::build_variables;

/// Chat settings resolved from the environment, falling back to defaults.
pub fn chat_options_from_env() -> ChatOptions {
    let provider = env::var(defaults::ENV_CHAT_PROVIDER)
        .unwrap_or_else(|_| defaults::CHAT_PROVIDER.to_string());
    let model =
        env::var(defaults::ENV_CHAT_MODEL).unwrap_or_else(|_| defaults::CHAT_MODEL.to_string());
    ChatOptions::new(provider, model)
}

/// How policy evaluation ended for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// A policy matched and its action list ran.
    Matched,
    /// No policy matched; the document routes to manual review.
    Fallback,
    /// The matching policy could not produce every required field.
    MissingFields,
}

/// Terminal result of evaluating one document against a policy set.
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub status: EngineStatus,
    pub policy_id: Option<Uuid>,
    pub policy_name: Option<String>,
    /// Baseline entities merged underneath policy fields.
    pub fields: Map<String, JsonValue>,
    pub action_results: Vec<ActionOutcome>,
    /// First action failure, when any action failed.
    pub action_error: Option<String>,
    /// Required keys the extractor could not produce.
    pub missing_fields: Vec<String>,
}

impl EngineOutcome {
    /// Error message carried by the `error` terminal status.
    pub fn missing_fields_message(&self) -> Option<String> {
        if self.missing_fields.is_empty() {
            None
        } else {
            Some(format!(
                "Missing required fields: {}",
                self.missing_fields.join(", ")
            ))
        }
    }
}

/// Evaluates a document against an owner's policies.
pub struct PolicyEngine {
    models: Arc<dyn LanguageModelService>,
    actions: ActionRunner,
    opts: ChatOptions,
}

impl PolicyEngine {
    pub fn new(
        models: Arc<dyn LanguageModelService>,
        actions: ActionRunner,
        opts: ChatOptions,
    ) -> Self {
        Self {
            models,
            actions,
            opts,
        }
    }

    pub fn chat_options(&self) -> &ChatOptions {
        &self.opts
    }

    /// Evaluate policies in ascending priority; first match wins.
    ///
    /// `ctx.vars` is filled from the merged fields before the action list
    /// runs; the caller seeds the rest of the context.
    #[instrument(skip(self, policies, doc, baseline, ctx, trace), fields(subsystem = "policy", component = "engine", op = "evaluate", policy_count = policies.len()))]
    pub async fn evaluate(
        &self,
        policies: &[Policy],
        doc: DocumentView<'_>,
        baseline: &Map<String, JsonValue>,
        ctx: &mut ActionContext,
        trace: &mut Vec<TraceStep>,
    ) -> EngineOutcome {
        let mut ordered: Vec<&Policy> = policies.iter().filter(|p| p.enabled).collect();
        ordered.sort_by_key(|p| p.priority);

        for policy in ordered {
            trace.push(TraceStep::new(
                "policy_match",
                format!(
                    "Evaluating policy \"{}\" (priority {})",
                    policy.name, policy.priority
                ),
            ));
            if !policy_matches(policy, doc, self.models.as_ref(), &self.opts, trace).await {
                continue;
            }
            trace.push(TraceStep::new(
                "policy_match",
                format!("Policy \"{}\" matched", policy.name),
            ));
            info!(policy = %policy.name, "Policy matched");

            let extracted = extract_policy_fields(
                doc.text,
                &policy.extract_spec,
                self.models.as_ref(),
                &self.opts,
            )
            .await;
            let missing = missing_required_fields(&policy.extract_spec, &extracted);
            let fields = merge_fields(baseline, &extracted);

            if !missing.is_empty() {
                let detail = format!("Missing required fields: {}", missing.join(", "));
                trace.push(TraceStep::new("extraction", detail));
                warn!(policy = %policy.name, missing = ?missing, "Required fields missing, skipping actions");
                return EngineOutcome {
                    status: EngineStatus::MissingFields,
                    policy_id: Some(policy.id),
                    policy_name: Some(policy.name.clone()),
                    fields,
                    action_results: Vec::new(),
                    action_error: None,
                    missing_fields: missing,
                };
            }
            if !policy.extract_spec.is_empty() {
                trace.push(TraceStep::new(
                    "extraction",
                    format!("Extracted {} fields", extracted.len()),
                ));
            }

            ctx.vars = build_variables(&fields, &policy.extract_spec);
            let action_results = self.actions.run_all(&policy.action_spec, ctx).await;
            for result in &action_results {
                let line = if result.success {
                    format!("Action {} succeeded: {}", result.action, result.detail)
                } else {
                    format!(
                        "Action {} failed: {}",
                        result.action,
                        result.error.as_deref().unwrap_or("unknown error")
                    )
                };
                trace.push(TraceStep::new("actions", line));
            }
            let action_error = action_results
                .iter()
                .find(|r| !r.success)
                .and_then(|r| r.error.clone());

            return EngineOutcome {
                status: EngineStatus::Matched,
                policy_id: Some(policy.id),
                policy_name: Some(policy.name.clone()),
                fields,
                action_results,
                action_error,
                missing_fields: Vec::new(),
            };
        }

        trace.push(TraceStep::new(
            "policy_match",
            "No policy matched; routed to review".to_string(),
        ));
        debug!("No policy matched");
        EngineOutcome {
            status: EngineStatus::Fallback,
            policy_id: None,
            policy_name: None,
            fields: baseline.clone(),
            action_results: vec![ActionOutcome::note("Moved to /_Needs_Review")],
            action_error: None,
            missing_fields: Vec::new(),
        }
    }
}

/// Baseline entities underneath policy fields. Policy values win key
/// collisions; a null policy value never erases a baseline value.
fn merge_fields(
    baseline: &Map<String, JsonValue>,
    policy_fields: &Map<String, JsonValue>,
) -> Map<String, JsonValue> {
    let mut merged = baseline.clone();
    for (key, value) in policy_fields {
        if value.is_null() && merged.get(key).map(|v| !v.is_null()).unwrap_or(false) {
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }
    merged
}
