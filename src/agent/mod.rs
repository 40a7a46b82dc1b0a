//! Agent Runtime: executes a single agent instance through its
//! Think -> Act -> Reflect cycle against a `CollaborationContext`.
//!
//! Grounded on the teacher's `orchestrator::llm_quality_judge` module
//! (quality rubric/evaluation shape) and `agent::task` (`Task`/`TaskResult`).

mod think;

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::clock::CancelScope;
use crate::error::{CoreError, CoreResult};
use crate::events::EventBus;
use crate::llm::LlmGateway;
use crate::model::{
    AgentStatus, CollaborationState, EventKind, Mode, ReflectionScore, RoleSpec, RubricDimension, StagedWrites, Task, TaskId, TaskResult,
};

pub use think::ParsedThink;

/// Everything an Agent Runtime cycle needs, borrowed by the orchestrator
/// for the duration of one task execution. The collaboration view is a
/// read-only snapshot -- writes are staged and committed by the caller.
pub struct CollaborationContext {
    pub session_id: uuid::Uuid,
    pub collaboration_view: CollaborationState,
    pub llm: Arc<LlmGateway>,
    pub events: EventBus,
    pub mode: Mode,
    pub scope: CancelScope,
}

/// Maximum number of Think/Act/Reflect cycles before a quality-gate
/// failure becomes a hard failure (spec §4.2: "up to 2 times total").
const MAX_CYCLES: u32 = 2;

/// Runs `role_spec` against `task` within `ctx`, returning the committed
/// `TaskResult` plus the staged writes the caller should commit to
/// `CollaborationState`.
#[instrument(skip(task, role_spec, ctx), fields(task_id = %task.id, role = %role_spec.id))]
pub async fn run(task: &Task, role_spec: &RoleSpec, ctx: &CollaborationContext) -> CoreResult<(TaskResult, StagedWrites)> {
    let timeout = ctx.mode.task_timeout();

    let cycle_fut = async {
        let mut last_overall: Option<f64> = None;
        for cycle in 0..MAX_CYCLES {
            emit_progress(ctx, task.id, 0.25);
            let parsed = think::think(&task_prompt(task, role_spec), &ctx.llm, ctx.mode, &ctx.scope).await?;

            emit_progress(ctx, task.id, 0.5);
            let staged = act(role_spec, &parsed, ctx).await?;

            emit_progress(ctx, task.id, 0.75);
            let quality = reflect(role_spec, &parsed, &staged);
            last_overall = Some(quality.overall);

            if quality.gate_passed {
                emit_progress(ctx, task.id, 0.9);
                let mut metadata = std::collections::HashMap::new();
                metadata.insert("insights".into(), serde_json::json!(parsed.insights));
                metadata.insert("next_actions".into(), serde_json::json!(parsed.next_actions));
                metadata.insert("reasoning_chain".into(), serde_json::json!(parsed.reasoning_chain));
                metadata.insert("confidence".into(), serde_json::json!(parsed.confidence));
                return Ok((
                    TaskResult {
                        content: parsed.summary.clone(),
                        quality,
                        artifacts: Vec::new(),
                        metadata,
                    },
                    staged,
                ));
            }

            warn!(task_id = %task.id, cycle, overall = quality.overall, "quality gate failed, retrying cycle");
        }

        Err(CoreError::Internal(format!(
            "agent {} exhausted {} cycles without passing the quality gate (overall {:.2})",
            role_spec.id,
            MAX_CYCLES,
            last_overall.unwrap_or(0.0)
        )))
    };

    let outcome = ctx
        .scope
        .run(tokio::time::timeout(timeout, cycle_fut))
        .await
        .ok_or(CoreError::Cancelled)?;

    match outcome {
        Ok(inner) => {
            let result = inner?;
            emit_progress(ctx, task.id, 1.0);
            info!(task_id = %task.id, "task completed");
            Ok(result)
        }
        Err(_elapsed) => Err(CoreError::Timeout(timeout)),
    }
}

fn task_prompt(task: &Task, role_spec: &RoleSpec) -> String {
    format!(
        "You are acting as the {} role for task '{}'. Sub-steps: {}.",
        role_spec.name,
        task.name,
        role_spec.sub_steps.join(", ")
    )
}

async fn act(role_spec: &RoleSpec, parsed: &ParsedThink, ctx: &CollaborationContext) -> CoreResult<StagedWrites> {
    let mut staged = StagedWrites::default();
    staged.agents.insert(role_spec.id.clone(), AgentStatus::Running);

    for sub_step in &role_spec.sub_steps {
        let prompt = format!(
            "Continue the {} role, sub-step '{}'. Prior reasoning: {}",
            role_spec.name,
            sub_step,
            parsed.reasoning_chain.join(" / ")
        );
        let output = ctx.llm.generate(&prompt, ctx.mode, &ctx.scope).await?;
        staged
            .shared_data
            .insert(format!("{}::{}", role_spec.id, sub_step), serde_json::Value::String(output));
    }

    staged.agents.insert(role_spec.id.clone(), AgentStatus::Succeeded);
    Ok(staged)
}

/// Scores the Act output against the six-dimension Reflect rubric
/// (completeness, accuracy, professionalism, clarity, actionability,
/// innovation), weighted per role, gated at `role_spec.threshold`.
fn reflect(role_spec: &RoleSpec, parsed: &ParsedThink, staged: &StagedWrites) -> ReflectionScore {
    let completeness = if staged.shared_data.len() >= role_spec.sub_steps.len() {
        parsed.confidence
    } else {
        parsed.confidence * 0.5
    };
    let accuracy = parsed.confidence;
    let professionalism = if !parsed.summary.trim().is_empty() && !parsed.insights.is_empty() {
        0.9
    } else {
        0.5
    };
    let clarity = if parsed.summary.split_whitespace().count() >= 3 { 0.9 } else { 0.5 };
    let actionability = if parsed.next_actions.is_empty() {
        0.4
    } else {
        (0.6 + 0.1 * parsed.next_actions.len() as f64).min(1.0)
    };
    let innovation = if parsed.insights.len() > 1 { 0.8 } else { 0.6 };

    let mut scores = std::collections::HashMap::new();
    scores.insert(RubricDimension::Completeness, completeness);
    scores.insert(RubricDimension::Accuracy, accuracy);
    scores.insert(RubricDimension::Professionalism, professionalism);
    scores.insert(RubricDimension::Clarity, clarity);
    scores.insert(RubricDimension::Actionability, actionability);
    scores.insert(RubricDimension::Innovation, innovation);

    let weights = if role_spec.quality_weights.is_empty() {
        None
    } else {
        Some(&role_spec.quality_weights)
    };
    ReflectionScore::evaluate(scores, weights, role_spec.threshold)
}

fn emit_progress(ctx: &CollaborationContext, task_id: TaskId, progress: f64) {
    ctx.events.publish(
        ctx.session_id,
        EventKind::TaskUpdate {
            task_id,
            status: AgentStatus::Running,
            progress,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmProvider, ProviderError};
    use async_trait::async_trait;
    use chrono::Utc;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn generate(&self, _prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String, ProviderError> {
            Ok(
                "{\"summary\":\"task completed with clear outcome\",\"insights\":[\"key finding one\",\"key finding two\"],\
                \"next_actions\":[\"proceed to next step\",\"validate output\"],\"confidence\":0.95,\"reasoning_chain\":[\"a\"]}"
                    .into(),
            )
        }
        fn endpoint_id(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn passing_cycle_commits_and_reports_full_progress() {
        let llm = Arc::new(LlmGateway::new(Arc::new(EchoProvider), 2));
        let events = EventBus::new();
        let session_id = uuid::Uuid::new_v4();
        let ctx = CollaborationContext {
            session_id,
            collaboration_view: CollaborationState::default(),
            llm,
            events,
            mode: Mode::Quick,
            scope: CancelScope::root(),
        };
        let task = Task::new(session_id, None, "clarify", Utc::now());
        let role = RoleSpec::clarifier();
        let (result, staged) = run(&task, &role, &ctx).await.unwrap();
        assert!(result.quality.gate_passed);
        assert_eq!(staged.agents.get("clarifier"), Some(&AgentStatus::Succeeded));
    }
}
