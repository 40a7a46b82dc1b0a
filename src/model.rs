//! Core data model: Session, CollaborationState, Task, ClarificationRound,
//! QualitySnapshot, Message, Artifact, Event, RoleSpec.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SessionId = Uuid;
pub type TaskId = Uuid;
pub type ArtifactId = Uuid;
pub type MessageId = Uuid;
pub type RoundId = Uuid;

/// Fixed once at `start`; spec §9 forbids switching modes mid-session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Quick,
    Standard,
    Deep,
    Workflow,
}

impl Mode {
    /// Per-call LLM defaults for this mode (timeout, max_tokens, temperature).
    pub fn llm_defaults(self) -> (std::time::Duration, u32, f32) {
        match self {
            Mode::Quick => (std::time::Duration::from_secs(20), 1024, 0.0),
            Mode::Standard | Mode::Workflow => (std::time::Duration::from_secs(60), 4096, 0.0),
            Mode::Deep => (std::time::Duration::from_secs(120), 8192, 0.2),
        }
    }

    /// Per-task timeout budget for an Agent Runtime cycle in this mode.
    pub fn task_timeout(self) -> std::time::Duration {
        match self {
            Mode::Quick => std::time::Duration::from_secs(30),
            Mode::Standard | Mode::Workflow => std::time::Duration::from_secs(90),
            Mode::Deep => std::time::Duration::from_secs(180),
        }
    }

    pub fn skips_review(self) -> bool {
        matches!(self, Mode::Quick)
    }

    pub fn allows_redocument(self) -> bool {
        matches!(self, Mode::Deep)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Clarifying,
    Analyzing,
    Documenting,
    Reviewing,
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Preparing,
    Running,
    Succeeded,
    Failed,
    Interrupted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub mode: Mode,
    pub phase: Phase,
    pub requirement_text: String,
    pub project_context: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Revision of the next event to be assigned; also used as the
    /// CollaborationState revision counter (see §3 invariants).
    pub revision: u64,
    pub root_task_id: Option<TaskId>,
    pub redocument_iterations: u32,
}

impl Session {
    pub fn new(
        id: SessionId,
        mode: Mode,
        requirement_text: String,
        project_context: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            mode,
            phase: Phase::Clarifying,
            requirement_text,
            project_context,
            created_at: now,
            updated_at: now,
            revision: 0,
            root_task_id: None,
            redocument_iterations: 0,
        }
    }
}

/// Session-scoped, revisioned key-value map. Last-writer-wins. Owned
/// exclusively by the Orchestrator; Agent Runtime only ever sees snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollaborationState {
    pub revision: u64,
    pub agents: HashMap<String, AgentStatus>,
    pub shared_data: HashMap<String, serde_json::Value>,
}

impl CollaborationState {
    /// Copy-on-read snapshot; callers may not mutate the live state through it.
    pub fn snapshot(&self) -> CollaborationState {
        self.clone()
    }

    /// Commits a staged set of writes atomically, bumping the revision once.
    pub fn commit(&mut self, staged: StagedWrites) {
        for (role, status) in staged.agents {
            self.agents.insert(role, status);
        }
        for (key, value) in staged.shared_data {
            self.shared_data.insert(key, value);
        }
        self.revision += 1;
    }
}

/// Accumulates writes during an Agent Runtime cycle before they are
/// committed atomically to `CollaborationState`.
#[derive(Debug, Clone, Default)]
pub struct StagedWrites {
    pub agents: HashMap<String, AgentStatus>,
    pub shared_data: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Fatal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub content: String,
    pub quality: ReflectionScore,
    pub artifacts: Vec<ArtifactId>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// The six dimensions the Agent Runtime's Reflect stage scores an Act
/// output against (spec §4.2), distinct from the Quality-Driven
/// Clarification Engine's 8-dimension `QualitySnapshot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RubricDimension {
    Completeness,
    Accuracy,
    Professionalism,
    Clarity,
    Actionability,
    Innovation,
}

impl RubricDimension {
    pub const ALL: [RubricDimension; 6] = [
        RubricDimension::Completeness,
        RubricDimension::Accuracy,
        RubricDimension::Professionalism,
        RubricDimension::Clarity,
        RubricDimension::Actionability,
        RubricDimension::Innovation,
    ];
}

/// The final Reflect snapshot for one Think-Act-Reflect cycle: `overall` is
/// the weighted mean of the six rubric dimensions, weighted per role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionScore {
    pub scores: HashMap<RubricDimension, f64>,
    pub overall: f64,
    pub gate_passed: bool,
}

impl ReflectionScore {
    /// `gate_passed = overall >= threshold` (role default 0.7), per spec §4.2.
    pub fn evaluate(scores: HashMap<RubricDimension, f64>, weights: Option<&HashMap<RubricDimension, f64>>, threshold: f64) -> Self {
        let overall = weighted_mean_rubric(&scores, weights);
        let gate_passed = overall >= threshold;
        Self { scores, overall, gate_passed }
    }
}

fn weighted_mean_rubric(scores: &HashMap<RubricDimension, f64>, weights: Option<&HashMap<RubricDimension, f64>>) -> f64 {
    let mut total_weight = 0.0;
    let mut sum = 0.0;
    for dim in RubricDimension::ALL {
        let score = scores.get(&dim).copied().unwrap_or(0.0);
        let weight = weights.and_then(|w| w.get(&dim).copied()).unwrap_or(1.0);
        sum += score * weight;
        total_weight += weight;
    }
    if total_weight == 0.0 {
        0.0
    } else {
        sum / total_weight
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub role: String,
    pub agent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub session_id: SessionId,
    pub parent_id: Option<TaskId>,
    pub name: String,
    pub participants: Vec<Participant>,
    pub status: AgentStatus,
    pub progress: f64,
    pub dependencies: Vec<TaskId>,
    pub result: Option<TaskResult>,
    pub weight: f64,
    pub retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(session_id: SessionId, parent_id: Option<TaskId>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            parent_id,
            name: name.into(),
            participants: Vec::new(),
            status: AgentStatus::Idle,
            progress: 0.0,
            dependencies: Vec::new(),
            result: None,
            weight: 1.0,
            retries: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            AgentStatus::Succeeded | AgentStatus::Failed | AgentStatus::Interrupted
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Med,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub text: String,
    pub category: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarificationRound {
    pub id: RoundId,
    pub sequence: u32,
    pub questions: Vec<Question>,
    pub answers: HashMap<Uuid, String>,
    pub quality: Option<QualitySnapshot>,
    pub created_at: DateTime<Utc>,
}

/// The eight quality dimensions the clarification gate and the Agent
/// Runtime's Reflect rubric both score against (equal-weighted by default,
/// see `RoleSpec::dimension_weights`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Functional,
    NonFunctional,
    UserRoles,
    BusinessRules,
    Constraints,
    AcceptanceCriteria,
    Integration,
    Data,
}

impl Dimension {
    pub const ALL: [Dimension; 8] = [
        Dimension::Functional,
        Dimension::NonFunctional,
        Dimension::UserRoles,
        Dimension::BusinessRules,
        Dimension::Constraints,
        Dimension::AcceptanceCriteria,
        Dimension::Integration,
        Dimension::Data,
    ];

    /// Dimensions that must individually clear 0.7 for the gate to pass,
    /// regardless of overall score (spec §4.1).
    pub const CRITICAL: [Dimension; 3] = [
        Dimension::Functional,
        Dimension::AcceptanceCriteria,
        Dimension::UserRoles,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualitySnapshot {
    pub scores: HashMap<Dimension, f64>,
    pub deficiencies: HashMap<Dimension, Vec<String>>,
    pub overall: f64,
    pub gate_passed: bool,
}

impl QualitySnapshot {
    pub const GATE_OVERALL_THRESHOLD: f64 = 0.8;
    pub const GATE_CRITICAL_THRESHOLD: f64 = 0.7;
    pub const FORCED_PROMOTION_FLOOR: f64 = 0.6;

    /// Computes overall as the weighted mean of `scores` and evaluates the
    /// gate per spec §4.1 (overall >= 0.8 AND every critical dimension >= 0.7).
    pub fn evaluate(scores: HashMap<Dimension, f64>, deficiencies: HashMap<Dimension, Vec<String>>, weights: Option<&HashMap<Dimension, f64>>) -> Self {
        let overall = weighted_mean(&scores, weights);
        let gate_passed = overall >= Self::GATE_OVERALL_THRESHOLD
            && Dimension::CRITICAL
                .iter()
                .all(|d| scores.get(d).copied().unwrap_or(0.0) >= Self::GATE_CRITICAL_THRESHOLD);
        Self {
            scores,
            deficiencies,
            overall,
            gate_passed,
        }
    }
}

fn weighted_mean(scores: &HashMap<Dimension, f64>, weights: Option<&HashMap<Dimension, f64>>) -> f64 {
    let mut total_weight = 0.0;
    let mut sum = 0.0;
    for dim in Dimension::ALL {
        let score = scores.get(&dim).copied().unwrap_or(0.0);
        let weight = weights.and_then(|w| w.get(&dim).copied()).unwrap_or(1.0);
        sum += score * weight;
        total_weight += weight;
    }
    if total_weight == 0.0 {
        0.0
    } else {
        sum / total_weight
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Agent,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Chat,
    Progress,
    Artifact,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: MessageRole,
    pub author: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub session_id: SessionId,
    pub name: String,
    pub content_type: String,
    pub content: String,
    pub producing_task_id: TaskId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    StateDelta { revision: u64 },
    Message { message: Message },
    TaskUpdate { task_id: TaskId, status: AgentStatus, progress: f64 },
    Quality { round_id: RoundId, snapshot: QualitySnapshot },
    Phase { phase: Phase },
    Heartbeat,
    Terminal { phase: Phase, error: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub session_id: SessionId,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

/// A named participant behavior: Clarifier, Analyst, Writer, Reviewer, etc.
/// Adding a role is a data change (construct another `RoleSpec`), never a
/// new type, per spec §9's "inheritance" design note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSpec {
    pub id: String,
    pub name: String,
    pub sub_steps: Vec<String>,
    pub quality_weights: HashMap<RubricDimension, f64>,
    pub threshold: f64,
}

impl RoleSpec {
    pub fn clarifier() -> Self {
        Self {
            id: "clarifier".into(),
            name: "Clarifier".into(),
            sub_steps: vec!["elicit".into()],
            quality_weights: HashMap::new(),
            threshold: 0.7,
        }
    }

    pub fn analyst() -> Self {
        Self {
            id: "analyst".into(),
            name: "Analyst".into(),
            sub_steps: vec![
                "business_process".into(),
                "business_rules".into(),
                "value".into(),
                "risk".into(),
            ],
            quality_weights: HashMap::new(),
            threshold: 0.7,
        }
    }

    pub fn writer() -> Self {
        Self {
            id: "writer".into(),
            name: "Writer".into(),
            sub_steps: vec!["draft".into()],
            quality_weights: HashMap::new(),
            threshold: 0.7,
        }
    }

    pub fn reviewer() -> Self {
        Self {
            id: "reviewer".into(),
            name: "Reviewer".into(),
            sub_steps: vec!["review".into()],
            quality_weights: HashMap::new(),
            threshold: 0.7,
        }
    }
}
