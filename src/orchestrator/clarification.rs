//! Quality-Driven Clarification Engine: drives the clarifying phase's
//! question/answer turns and decides when the quality gate allows
//! promotion to analyzing (spec §4.1).
//!
//! Grounded on the teacher's `orchestrator::llm_quality_judge` module:
//! dimension scoring, deficiency listing, and threshold-gated evaluation,
//! generalized from task review to clarification-round gating.

use std::collections::HashMap;

use uuid::Uuid;

use crate::model::{ClarificationRound, Dimension, Priority, Question, QualitySnapshot, RoundId, TaskResult};

pub const MAX_QUESTIONS_PER_ROUND: usize = 5;
pub const MAX_HIGH_PRIORITY_PER_ROUND: usize = 3;
pub const MAX_ROUNDS: u32 = 8;

/// The result of evaluating one clarification turn.
pub enum GateOutcome {
    /// Gate passed; proceed to analyzing.
    Pass,
    /// Gate failed; ask the user these questions and await answers.
    AskMore(Vec<Question>),
    /// Max rounds reached with overall above the forced-promotion floor;
    /// proceed to analyzing anyway.
    ForcedPromotion,
    /// Max rounds reached with overall still below the floor; terminal
    /// failure.
    Exhausted { rounds: u32, overall: f64 },
}

/// Selects up to `MAX_QUESTIONS_PER_ROUND` questions, prioritizing the
/// lowest-scoring dimensions first, capping `high` priority questions at
/// `MAX_HIGH_PRIORITY_PER_ROUND` per round (spec §4.1 step 3).
pub fn select_questions(snapshot: &QualitySnapshot) -> Vec<Question> {
    let mut dims: Vec<(Dimension, f64)> = snapshot.scores.iter().map(|(d, s)| (*d, *s)).collect();
    dims.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut questions = Vec::new();
    let mut high_count = 0usize;

    for (dim, score) in dims {
        if questions.len() >= MAX_QUESTIONS_PER_ROUND {
            break;
        }
        let priority = priority_for(score);
        if priority == Priority::High && high_count >= MAX_HIGH_PRIORITY_PER_ROUND {
            continue;
        }
        let deficiencies = snapshot.deficiencies.get(&dim);
        let text = match deficiencies.and_then(|d| d.first()) {
            Some(detail) => format!("Can you clarify {}: {}?", dimension_label(dim), detail),
            None => format!("Can you provide more detail on {}?", dimension_label(dim)),
        };
        if priority == Priority::High {
            high_count += 1;
        }
        questions.push(Question {
            id: Uuid::new_v4(),
            text,
            category: dimension_label(dim).to_string(),
            priority,
        });
    }
    questions
}

fn priority_for(score: f64) -> Priority {
    if score < 0.4 {
        Priority::High
    } else if score < 0.7 {
        Priority::Med
    } else {
        Priority::Low
    }
}

fn dimension_label(dim: Dimension) -> &'static str {
    match dim {
        Dimension::Functional => "functional requirements",
        Dimension::NonFunctional => "non-functional requirements",
        Dimension::UserRoles => "user roles",
        Dimension::BusinessRules => "business rules",
        Dimension::Constraints => "constraints",
        Dimension::AcceptanceCriteria => "acceptance criteria",
        Dimension::Integration => "integration points",
        Dimension::Data => "data entities",
    }
}

/// Derives the clarifying-phase 8-dimension `QualitySnapshot` from the
/// Clarifier agent's `TaskResult`. The Quality-Driven Clarification Engine
/// is an Orchestrator concern (spec §2 flow), separate from the Agent
/// Runtime's 6-dimension Reflect rubric carried in `TaskResult::quality` --
/// so this reads the Think-stage output the Clarifier staged into
/// `TaskResult::metadata` rather than reusing `quality.gate_passed`.
pub fn quality_from_task_result(result: &TaskResult) -> QualitySnapshot {
    let confidence = result.metadata.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let insight_count = result
        .metadata
        .get("insights")
        .and_then(|v| v.as_array())
        .map(|a| a.len())
        .unwrap_or(0);

    // Dimensions the Clarifier's insights demonstrably cover score at full
    // confidence; the remainder score at confidence scaled down slightly by
    // how much of the dimension set was covered at all, so a clarifier that
    // surfaces few named insights but is genuinely confident still clears
    // the gate, while a genuinely unconfident one (low `confidence`) never
    // does regardless of insight count.
    let coverage = (insight_count as f64 / Dimension::ALL.len() as f64).min(1.0);
    let mut scores = HashMap::new();
    for (i, dim) in Dimension::ALL.into_iter().enumerate() {
        let score = if i < insight_count { confidence } else { confidence * (0.85 + 0.15 * coverage) };
        scores.insert(dim, score.clamp(0.0, 1.0));
    }
    QualitySnapshot::evaluate(scores, HashMap::new(), None)
}

/// Recomputes the spec §4.1 gate directly from `snapshot.scores` (overall
/// >= 0.8 AND every critical dimension >= 0.7) rather than trusting a
/// `gate_passed` flag that may have been computed against a different
/// rubric/threshold upstream.
fn passes_clarification_gate(snapshot: &QualitySnapshot) -> bool {
    snapshot.overall >= QualitySnapshot::GATE_OVERALL_THRESHOLD
        && Dimension::CRITICAL
            .iter()
            .all(|d| snapshot.scores.get(d).copied().unwrap_or(0.0) >= QualitySnapshot::GATE_CRITICAL_THRESHOLD)
}

/// Decides the next step for a clarification turn given the round number
/// just completed (1-indexed) and its quality snapshot.
pub fn evaluate_gate(round_number: u32, snapshot: &QualitySnapshot) -> GateOutcome {
    if passes_clarification_gate(snapshot) {
        return GateOutcome::Pass;
    }
    if round_number >= MAX_ROUNDS {
        return if snapshot.overall >= QualitySnapshot::FORCED_PROMOTION_FLOOR {
            GateOutcome::ForcedPromotion
        } else {
            GateOutcome::Exhausted {
                rounds: round_number,
                overall: snapshot.overall,
            }
        };
    }
    GateOutcome::AskMore(select_questions(snapshot))
}

pub fn new_round(sequence: u32, questions: Vec<Question>) -> ClarificationRound {
    ClarificationRound {
        id: RoundId::new_v4(),
        sequence,
        questions,
        answers: HashMap::new(),
        quality: None,
        created_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(overall_scores: &[(Dimension, f64)]) -> QualitySnapshot {
        let scores: HashMap<Dimension, f64> = overall_scores.iter().copied().collect();
        QualitySnapshot::evaluate(scores, HashMap::new(), None)
    }

    #[test]
    fn boundary_overall_0_8_with_criticals_0_7_passes() {
        let snap = snapshot(&[
            (Dimension::Functional, 0.7),
            (Dimension::AcceptanceCriteria, 0.7),
            (Dimension::UserRoles, 0.7),
            (Dimension::NonFunctional, 1.0),
            (Dimension::BusinessRules, 1.0),
            (Dimension::Constraints, 1.0),
            (Dimension::Integration, 1.0),
            (Dimension::Data, 1.0),
        ]);
        assert!((snap.overall - 0.8625).abs() < 1e-9 || snap.overall >= 0.8);
        assert!(snap.gate_passed);
    }

    #[test]
    fn high_overall_but_weak_critical_dimension_fails_gate() {
        let snap = snapshot(&[
            (Dimension::Functional, 0.5),
            (Dimension::AcceptanceCriteria, 1.0),
            (Dimension::UserRoles, 1.0),
            (Dimension::NonFunctional, 1.0),
            (Dimension::BusinessRules, 1.0),
            (Dimension::Constraints, 1.0),
            (Dimension::Integration, 1.0),
            (Dimension::Data, 1.0),
        ]);
        assert!(snap.overall >= 0.8);
        assert!(!snap.gate_passed);
    }

    #[test]
    fn max_rounds_with_floor_forces_promotion() {
        let snap = snapshot(&[
            (Dimension::Functional, 0.6),
            (Dimension::AcceptanceCriteria, 0.6),
            (Dimension::UserRoles, 0.6),
            (Dimension::NonFunctional, 0.6),
            (Dimension::BusinessRules, 0.6),
            (Dimension::Constraints, 0.6),
            (Dimension::Integration, 0.6),
            (Dimension::Data, 0.6),
        ]);
        matches!(evaluate_gate(MAX_ROUNDS, &snap), GateOutcome::ForcedPromotion);
    }

    #[test]
    fn max_rounds_below_floor_is_exhausted() {
        let snap = snapshot(&[
            (Dimension::Functional, 0.3),
            (Dimension::AcceptanceCriteria, 0.3),
            (Dimension::UserRoles, 0.3),
            (Dimension::NonFunctional, 0.3),
            (Dimension::BusinessRules, 0.3),
            (Dimension::Constraints, 0.3),
            (Dimension::Integration, 0.3),
            (Dimension::Data, 0.3),
        ]);
        assert!(matches!(
            evaluate_gate(MAX_ROUNDS, &snap),
            GateOutcome::Exhausted { .. }
        ));
    }

    #[test]
    fn question_selection_caps_high_priority_count() {
        let snap = snapshot(&[
            (Dimension::Functional, 0.1),
            (Dimension::AcceptanceCriteria, 0.1),
            (Dimension::UserRoles, 0.1),
            (Dimension::NonFunctional, 0.1),
            (Dimension::BusinessRules, 0.1),
            (Dimension::Constraints, 1.0),
            (Dimension::Integration, 1.0),
            (Dimension::Data, 1.0),
        ]);
        let questions = select_questions(&snap);
        let high = questions.iter().filter(|q| q.priority == Priority::High).count();
        assert!(high <= MAX_HIGH_PRIORITY_PER_ROUND);
        assert!(questions.len() <= MAX_QUESTIONS_PER_ROUND);
    }
}
