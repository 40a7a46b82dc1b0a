//! Flow Orchestrator: drives a session through its phases end-to-end, owns
//! the task tree, enforces the clarification quality gate, publishes
//! events.
//!
//! Grounded on the teacher's `orchestrator::MasterClaude`
//! (`OrchestratorState`/`OrchestratorStatus` phase-machine shape) and
//! `orchestrator::llm_quality_judge` (dimension-scored gating, generalized
//! from task review to clarification rounds).

pub mod clarification;
pub mod scheduler;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, Notify, Semaphore};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::agent::{self, CollaborationContext};
use crate::clock::{CancelScope, Clock, SystemClock};
use crate::error::{CoreError, CoreResult};
use crate::events::{EventBus, Subscription};
use crate::llm::LlmGateway;
use crate::model::{
    Artifact, ClarificationRound, CollaborationState, EventKind, Mode, Phase, RoleSpec, Session, SessionId, Task,
};
use crate::store::{SessionRecord, SharedStore};
use scheduler::TaskGraph;

/// Defaults from spec §4.1/§5; overridable via `OrchestratorConfig`.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_agents_per_session: usize,
    pub max_sessions_per_process: usize,
    pub idle_timeout: Duration,
    /// How long a terminal session's record and event bus stay reachable
    /// before `purge` reclaims them (spec §4.5 default: 7 days).
    pub session_retention: chrono::Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_agents_per_session: 3,
            max_sessions_per_process: 100,
            idle_timeout: Duration::from_secs(1800),
            session_retention: chrono::Duration::days(7),
        }
    }
}

/// Snapshot returned by `get_session`; never exposes internal locks.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session: Session,
    pub progress: f64,
    pub last_round: Option<ClarificationRound>,
    pub artifacts: Vec<Artifact>,
}

/// The live, mutable state of one in-progress session. Everything here is
/// exclusively owned by the orchestrator (spec §3 ownership rule); agent
/// runs only ever see a `CollaborationState::snapshot()`.
struct SessionHandle {
    session: Mutex<Session>,
    collaboration: Mutex<CollaborationState>,
    graph: Mutex<TaskGraph>,
    rounds: Mutex<Vec<ClarificationRound>>,
    artifacts: Mutex<Vec<Artifact>>,
    scope: CancelScope,
    answer_notify: Notify,
    pending_answers: Mutex<Option<HashMap<Uuid, String>>>,
    last_activity: Mutex<chrono::DateTime<chrono::Utc>>,
}

/// Drives the six-component core end to end. Cheap to clone: internals are
/// `Arc`-shared.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    config: OrchestratorConfig,
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    session_cap: Semaphore,
    events: EventBus,
    store: SharedStore,
    llm: Arc<LlmGateway>,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, events: EventBus, store: SharedStore, llm: Arc<LlmGateway>) -> Self {
        let session_cap = Semaphore::new(config.max_sessions_per_process);
        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                sessions: DashMap::new(),
                session_cap,
                events,
                store,
                llm,
                clock: Arc::new(SystemClock),
            }),
        }
    }

    /// Starts a new session and spawns its driving task. Returns
    /// immediately with the new session id; the flow runs in the
    /// background, publishing events as it progresses.
    #[instrument(skip(self, project_context))]
    pub async fn start(&self, requirement_text: String, mode: Mode, project_context: Option<String>) -> CoreResult<SessionId> {
        if requirement_text.trim().is_empty() {
            return Err(CoreError::InvalidInput("requirement_text must not be empty".into()));
        }
        let _permit = self
            .inner
            .session_cap
            .try_acquire()
            .map_err(|_| CoreError::Busy("max_sessions_per_process exceeded".into()))?;
        // Leak the permit for the session's lifetime; it is released when
        // the session is purged (see `purge`).
        std::mem::forget(_permit);

        let now = self.inner.clock.now();
        let id = Uuid::new_v4();
        let session = Session::new(id, mode, requirement_text, project_context, now);

        let handle = Arc::new(SessionHandle {
            session: Mutex::new(session.clone()),
            collaboration: Mutex::new(CollaborationState::default()),
            graph: Mutex::new(TaskGraph::new()),
            rounds: Mutex::new(Vec::new()),
            artifacts: Mutex::new(Vec::new()),
            scope: CancelScope::root(),
            answer_notify: Notify::new(),
            pending_answers: Mutex::new(None),
            last_activity: Mutex::new(now),
        });
        self.inner.sessions.insert(id, handle.clone());

        self.inner
            .store
            .put_session(SessionRecord { session, events: vec![] })
            .await?;

        self.emit(id, EventKind::Phase { phase: Phase::Clarifying }).await;
        self.inner.events.spawn_heartbeat(id);

        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.drive(id).await {
                warn!(session = %id, error = %e, "session driver ended with an error");
            }
        });

        Ok(id)
    }

    /// Submits user answers for the session's current clarification round.
    pub async fn submit_answer(&self, session_id: SessionId, answers: HashMap<Uuid, String>) -> CoreResult<()> {
        let handle = self.handle(session_id)?;
        {
            let session = handle.session.lock().await;
            if session.phase.is_terminal() {
                return Err(CoreError::SessionTerminal(session_id.to_string()));
            }
            if session.phase != Phase::Clarifying {
                return Err(CoreError::NotClarifying(session_id.to_string()));
            }
        }
        *handle.pending_answers.lock().await = Some(answers);
        *handle.last_activity.lock().await = self.inner.clock.now();
        handle.answer_notify.notify_one();
        Ok(())
    }

    pub fn subscribe(&self, session_id: SessionId, from_sequence: u64) -> CoreResult<Subscription> {
        if !self.inner.sessions.contains_key(&session_id) {
            return Err(CoreError::UnknownSession(session_id.to_string()));
        }
        self.inner.events.subscribe(session_id, from_sequence)
    }

    pub async fn cancel(&self, session_id: SessionId) -> CoreResult<()> {
        let handle = self.handle(session_id)?;
        handle.scope.cancel();
        let already_terminal = {
            let mut session = handle.session.lock().await;
            let was_terminal = session.phase.is_terminal();
            if !was_terminal {
                session.phase = Phase::Failed;
                session.updated_at = self.inner.clock.now();
            }
            was_terminal
        };
        if !already_terminal {
            let session_clone = handle.session.lock().await.clone();
            self.persist_session(session_id, &session_clone).await;
            self.emit(
                session_id,
                EventKind::Terminal {
                    phase: Phase::Failed,
                    error: Some("cancelled".into()),
                },
            )
            .await;
            self.schedule_purge(session_id);
        }
        Ok(())
    }

    pub async fn get_session(&self, session_id: SessionId) -> CoreResult<SessionSnapshot> {
        let handle = self.handle(session_id)?;
        let session = handle.session.lock().await.clone();
        let graph = handle.graph.lock().await;
        let progress = session
            .root_task_id
            .map(|root| graph.rollup_progress(root))
            .unwrap_or(0.0);
        drop(graph);
        let rounds = handle.rounds.lock().await;
        let last_round = rounds.last().cloned();
        drop(rounds);
        let artifacts = handle.artifacts.lock().await.clone();
        Ok(SessionSnapshot {
            session,
            progress,
            last_round,
            artifacts,
        })
    }

    fn handle(&self, session_id: SessionId) -> CoreResult<Arc<SessionHandle>> {
        self.inner
            .sessions
            .get(&session_id)
            .map(|h| h.clone())
            .ok_or_else(|| CoreError::UnknownSession(session_id.to_string()))
    }

    /// Removes a session from the live registry, its event bus, and its
    /// durable record, and releases its slot in `max_sessions_per_process`.
    pub async fn purge(&self, session_id: SessionId) {
        self.inner.sessions.remove(&session_id);
        self.inner.events.purge(session_id);
        self.inner.session_cap.add_permits(1);
        if let Err(e) = self.inner.store.purge_session(session_id).await {
            warn!(session = %session_id, error = %e, "failed to purge session record");
        }
    }

    /// Schedules this terminal session for purge after `session_retention`
    /// (spec §4.5 default 7 days since last activity).
    fn schedule_purge(&self, session_id: SessionId) {
        let orchestrator = self.clone();
        let retention = self.inner.config.session_retention;
        let delay = retention.to_std().unwrap_or(Duration::from_secs(7 * 24 * 3600));
        let clock = self.inner.clock.clone();
        tokio::spawn(async move {
            clock.sleep(delay).await;
            orchestrator.purge(session_id).await;
        });
    }

    /// Persists an event through the durable store before fanning it out on
    /// the live bus, per spec §4.5's "append_event durable before
    /// acknowledgment".
    async fn emit(&self, session_id: SessionId, kind: EventKind) -> crate::model::Event {
        let event = self.inner.events.publish(session_id, kind);
        if let Err(e) = self.inner.store.append_event(session_id, event.clone()).await {
            warn!(session = %session_id, error = %e, "failed to persist event");
        }
        event
    }

    /// Rewrites the durable session record, preserving its already-persisted
    /// event log (spec §4.5/§8 round-trip: phase/revision survive restart).
    async fn persist_session(&self, session_id: SessionId, session: &Session) {
        let events = match self.inner.store.get_session(session_id).await {
            Ok(Some(record)) => record.events,
            _ => Vec::new(),
        };
        if let Err(e) = self
            .inner
            .store
            .put_session(SessionRecord { session: session.clone(), events })
            .await
        {
            warn!(session = %session_id, error = %e, "failed to persist session record");
        }
    }

    /// Commits staged writes, bumps `session.revision`/`updated_at`,
    /// persists the record, and emits the resulting `StateDelta`.
    async fn commit_and_persist(&self, handle: &SessionHandle, session_id: SessionId, staged: crate::model::StagedWrites) -> u64 {
        let mut collab = handle.collaboration.lock().await;
        collab.commit(staged);
        let revision = collab.revision;
        drop(collab);

        let session_clone = {
            let mut session = handle.session.lock().await;
            session.revision = revision;
            session.updated_at = self.inner.clock.now();
            session.clone()
        };
        self.persist_session(session_id, &session_clone).await;
        self.emit(session_id, EventKind::StateDelta { revision }).await;
        revision
    }

    async fn set_phase(&self, handle: &SessionHandle, session_id: SessionId, phase: Phase) {
        let session_clone = {
            let mut session = handle.session.lock().await;
            session.phase = phase;
            session.updated_at = self.inner.clock.now();
            session.clone()
        };
        self.persist_session(session_id, &session_clone).await;
        self.emit(session_id, EventKind::Phase { phase }).await;
    }

    async fn fail(&self, handle: &SessionHandle, session_id: SessionId, error: CoreError) {
        let session_clone = {
            let mut session = handle.session.lock().await;
            session.phase = Phase::Failed;
            session.updated_at = self.inner.clock.now();
            session.clone()
        };
        self.persist_session(session_id, &session_clone).await;
        self.emit(
            session_id,
            EventKind::Terminal {
                phase: Phase::Failed,
                error: Some(error.to_string()),
            },
        )
        .await;
        self.schedule_purge(session_id);
    }

    /// The full phase-machine drive for one session: clarifying ->
    /// analyzing -> documenting -> (reviewing) -> done, per spec §4.1.
    #[instrument(skip(self), fields(session = %session_id))]
    async fn drive(&self, session_id: SessionId) -> CoreResult<()> {
        let handle = self.handle(session_id)?;
        let mode = handle.session.lock().await.mode;

        let root = Task::new(session_id, None, "root", self.inner.clock.now());
        let root_id = root.id;
        handle.graph.lock().await.insert(root).expect("root task never cycles");
        handle.session.lock().await.root_task_id = Some(root_id);

        match self.run_clarifying(&handle, session_id, mode, root_id).await {
            Ok(ClarifyOutcome::Proceed) => {}
            Ok(ClarifyOutcome::AlreadyTerminal) => return Ok(()),
            Err(e) => {
                self.fail(&handle, session_id, e).await;
                return Ok(());
            }
        }

        self.set_phase(&handle, session_id, Phase::Analyzing).await;
        if let Err(e) = self.run_analyzing(&handle, session_id, mode, root_id).await {
            self.fail(&handle, session_id, e).await;
            return Ok(());
        }

        self.set_phase(&handle, session_id, Phase::Documenting).await;
        let draft = match self.run_documenting(&handle, session_id, mode, root_id).await {
            Ok(draft) => draft,
            Err(e) => {
                self.fail(&handle, session_id, e).await;
                return Ok(());
            }
        };

        if mode.skips_review() {
            self.publish_artifact(&handle, session_id, draft, root_id).await;
            self.set_phase(&handle, session_id, Phase::Done).await;
            self.emit(session_id, EventKind::Terminal { phase: Phase::Done, error: None }).await;
            self.schedule_purge(session_id);
            return Ok(());
        }

        self.set_phase(&handle, session_id, Phase::Reviewing).await;
        match self.run_reviewing(&handle, session_id, mode, root_id, draft.clone()).await {
            Ok(ReviewOutcome::Approved(final_draft)) => {
                self.publish_artifact(&handle, session_id, final_draft, root_id).await;
                self.set_phase(&handle, session_id, Phase::Done).await;
                self.emit(session_id, EventKind::Terminal { phase: Phase::Done, error: None }).await;
                self.schedule_purge(session_id);
            }
            Ok(ReviewOutcome::Rejected) => {
                self.fail(&handle, session_id, CoreError::Internal("review rejected and no re-document budget remained".into()))
                    .await;
            }
            Err(e) => {
                self.fail(&handle, session_id, e).await;
            }
        }

        Ok(())
    }

    async fn run_clarifying(&self, handle: &SessionHandle, session_id: SessionId, mode: Mode, root_id: Uuid) -> CoreResult<ClarifyOutcome> {
        let role = RoleSpec::clarifier();
        let mut round_number = 0u32;

        loop {
            if handle.scope.is_cancelled() {
                return Ok(ClarifyOutcome::AlreadyTerminal);
            }
            round_number += 1;

            let task = Task::new(session_id, Some(root_id), format!("clarify-round-{round_number}"), self.inner.clock.now());
            let (result, staged) = self.run_agent(handle, session_id, mode, &task, &role).await?;
            self.commit_and_persist(handle, session_id, staged).await;

            let quality = clarification::quality_from_task_result(&result);
            let outcome = clarification::evaluate_gate(round_number, &quality);
            match outcome {
                clarification::GateOutcome::Pass | clarification::GateOutcome::ForcedPromotion => {
                    let mut round = clarification::new_round(round_number, Vec::new());
                    round.quality = Some(quality);
                    handle.rounds.lock().await.push(round);
                    return Ok(ClarifyOutcome::Proceed);
                }
                clarification::GateOutcome::Exhausted { rounds, overall } => {
                    return Err(CoreError::ClarificationExhausted { rounds, overall });
                }
                clarification::GateOutcome::AskMore(questions) => {
                    let round = clarification::new_round(round_number, questions.clone());
                    let round_id = round.id;
                    handle.rounds.lock().await.push(round);

                    self.emit(
                        session_id,
                        EventKind::Quality {
                            round_id,
                            snapshot: quality.clone(),
                        },
                    )
                    .await;
                    self.publish_questions(session_id, &questions).await;

                    let answers = self.await_answers(handle, session_id).await?;
                    let mut rounds = handle.rounds.lock().await;
                    if let Some(last) = rounds.last_mut() {
                        last.answers = answers;
                    }
                }
            }
        }
    }

    async fn publish_questions(&self, session_id: SessionId, questions: &[crate::model::Question]) {
        let message = crate::model::Message {
            id: Uuid::new_v4(),
            session_id,
            role: crate::model::MessageRole::Agent,
            author: "clarifier".into(),
            kind: crate::model::MessageKind::Chat,
            timestamp: self.inner.clock.now(),
            payload: serde_json::json!({ "questions": questions }),
        };
        self.emit(session_id, EventKind::Message { message }).await;
    }

    /// Waits for `submit_answer` or the idle timeout, whichever comes
    /// first (spec §5: idle timeout default 30 min while clarifying).
    async fn await_answers(&self, handle: &SessionHandle, session_id: SessionId) -> CoreResult<HashMap<Uuid, String>> {
        let idle_timeout = self.inner.config.idle_timeout;
        loop {
            let notified = handle.answer_notify.notified();
            tokio::select! {
                _ = notified => {
                    if let Some(answers) = handle.pending_answers.lock().await.take() {
                        return Ok(answers);
                    }
                }
                _ = self.inner.clock.sleep(idle_timeout) => {
                    return Err(CoreError::IdleTimeout(session_id.to_string()));
                }
                _ = handle.scope.cancelled() => {
                    return Err(CoreError::Cancelled);
                }
            }
        }
    }

    /// Dispatches one sub-task per analyst sub-step through `TaskGraph`'s
    /// ready-set scheduler, bounded by `max_agents_per_session` in-flight
    /// (spec §4.1). The sub-steps have no dependency edges so all become
    /// ready at once; the graph still governs concurrency and dispatch
    /// order rather than a bare semaphore.
    async fn run_analyzing(&self, handle: &SessionHandle, session_id: SessionId, mode: Mode, root_id: Uuid) -> CoreResult<()> {
        let mut pending: HashMap<Uuid, RoleSpec> = HashMap::new();
        for sub_step in &RoleSpec::analyst().sub_steps {
            let mut sub_role = RoleSpec::analyst();
            sub_role.sub_steps = vec![sub_step.clone()];
            let task = Task::new(session_id, Some(root_id), format!("analyze-{sub_step}"), self.inner.clock.now());
            handle.graph.lock().await.insert(task.clone())?;
            pending.insert(task.id, sub_role);
        }

        type AnalystJoin = CoreResult<(crate::model::TaskResult, crate::model::StagedWrites)>;
        let mut join_set: tokio::task::JoinSet<(Uuid, AnalystJoin)> = tokio::task::JoinSet::new();

        while !pending.is_empty() || !join_set.is_empty() {
            let dispatchable: Vec<Uuid> = {
                let graph = handle.graph.lock().await;
                let capacity = self.inner.config.max_agents_per_session.saturating_sub(graph.in_flight_count());
                graph.ready_set().into_iter().filter(|id| pending.contains_key(id)).take(capacity).collect()
            };

            for task_id in dispatchable {
                let sub_role = pending.remove(&task_id).expect("filtered against pending above");
                self.mark_task(handle, task_id, crate::model::AgentStatus::Running, 0.0).await;
                let this = self.clone();
                let session_arc = self.handle(session_id)?;
                join_set.spawn(async move {
                    let task = {
                        let graph = session_arc.graph.lock().await;
                        graph.get(task_id).cloned().expect("task inserted before dispatch")
                    };
                    let result = this.run_agent(&session_arc, session_id, mode, &task, &sub_role).await;
                    (task_id, result)
                });
            }

            if join_set.is_empty() {
                if pending.is_empty() {
                    break;
                }
                return Err(CoreError::InvalidTaskGraph(session_id.to_string()));
            }

            let Some(joined) = join_set.join_next().await else { continue };
            let (_task_id, outcome) = joined.map_err(|e| CoreError::Internal(format!("analyst sub-task panicked: {e}")))?;
            let (result, staged) = outcome?;
            self.commit_and_persist(handle, session_id, staged).await;
            let _ = result;
        }
        Ok(())
    }

    async fn run_documenting(&self, handle: &SessionHandle, session_id: SessionId, mode: Mode, root_id: Uuid) -> CoreResult<String> {
        let role = RoleSpec::writer();
        let task = Task::new(session_id, Some(root_id), "document", self.inner.clock.now());
        let (result, staged) = self.run_agent(handle, session_id, mode, &task, &role).await?;
        self.commit_and_persist(handle, session_id, staged).await;
        Ok(result.content)
    }

    async fn run_reviewing(
        &self,
        handle: &SessionHandle,
        session_id: SessionId,
        mode: Mode,
        root_id: Uuid,
        draft: String,
    ) -> CoreResult<ReviewOutcome> {
        let role = RoleSpec::reviewer();
        let task = Task::new(session_id, Some(root_id), "review", self.inner.clock.now());
        let (result, staged) = self.run_agent(handle, session_id, mode, &task, &role).await?;
        self.commit_and_persist(handle, session_id, staged).await;

        if result.quality.gate_passed {
            return Ok(ReviewOutcome::Approved(draft));
        }

        if !mode.allows_redocument() {
            return Ok(ReviewOutcome::Rejected);
        }

        let mut session = handle.session.lock().await;
        if session.redocument_iterations >= 1 {
            return Ok(ReviewOutcome::Rejected);
        }
        session.redocument_iterations += 1;
        drop(session);

        self.set_phase(handle, session_id, Phase::Documenting).await;
        let redrafted = self.run_documenting(handle, session_id, mode, root_id).await?;
        self.set_phase(handle, session_id, Phase::Reviewing).await;

        let review_task = Task::new(session_id, Some(root_id), "review-2", self.inner.clock.now());
        let (result2, staged2) = self.run_agent(handle, session_id, mode, &review_task, &role).await?;
        self.commit_and_persist(handle, session_id, staged2).await;

        if result2.quality.gate_passed {
            Ok(ReviewOutcome::Approved(redrafted))
        } else {
            Ok(ReviewOutcome::Rejected)
        }
    }

    async fn publish_artifact(&self, handle: &SessionHandle, session_id: SessionId, content: String, root_id: Uuid) {
        let artifact = Artifact {
            id: Uuid::new_v4(),
            session_id,
            name: "requirements_spec.md".into(),
            content_type: "text/markdown".into(),
            content,
            producing_task_id: root_id,
        };
        handle.artifacts.lock().await.push(artifact.clone());
        let message = crate::model::Message {
            id: Uuid::new_v4(),
            session_id,
            role: crate::model::MessageRole::System,
            author: "orchestrator".into(),
            kind: crate::model::MessageKind::Artifact,
            timestamp: self.inner.clock.now(),
            payload: serde_json::json!({ "artifact_id": artifact.id, "name": artifact.name }),
        };
        self.emit(session_id, EventKind::Message { message }).await;
    }

    /// Runs one agent task with the task-level transient retry policy
    /// (spec §4.1: up to 2 retries, 500ms/2s backoff) layered over the
    /// Agent Runtime's own internal quality-gate retries.
    async fn run_agent(
        &self,
        handle: &SessionHandle,
        session_id: SessionId,
        mode: Mode,
        task: &Task,
        role: &RoleSpec,
    ) -> CoreResult<(crate::model::TaskResult, crate::model::StagedWrites)> {
        handle.graph.lock().await.insert(task.clone())?;
        self.mark_task(handle, task.id, crate::model::AgentStatus::Running, 0.0).await;

        let collaboration_view = handle.collaboration.lock().await.snapshot();
        let ctx = CollaborationContext {
            session_id,
            collaboration_view,
            llm: self.inner.llm.clone(),
            events: self.inner.events.clone(),
            mode,
            scope: handle.scope.child(),
        };

        let retry_policy = crate::llm::RetryPolicy::task_level();
        let mut attempt = 0;
        loop {
            match agent::run(task, role, &ctx).await {
                Ok((result, staged)) => {
                    self.mark_task(handle, task.id, crate::model::AgentStatus::Succeeded, 1.0).await;
                    return Ok((result, staged));
                }
                Err(e) if e.is_retryable() && attempt < retry_policy.max_retries => {
                    let backoff = retry_policy.backoff_for(attempt);
                    attempt += 1;
                    warn!(task_id = %task.id, attempt, error = %e, "retrying transient task failure");
                    self.inner.clock.sleep(backoff).await;
                }
                Err(e) => {
                    self.mark_task(handle, task.id, crate::model::AgentStatus::Failed, 0.0).await;
                    return Err(e);
                }
            }
        }
    }

    async fn mark_task(&self, handle: &SessionHandle, task_id: Uuid, status: crate::model::AgentStatus, progress: f64) {
        if let Some(task) = handle.graph.lock().await.get_mut(task_id) {
            task.status = status;
            task.progress = progress;
            task.updated_at = self.inner.clock.now();
        }
    }
}

enum ClarifyOutcome {
    Proceed,
    AlreadyTerminal,
}

enum ReviewOutcome {
    Approved(String),
    Rejected,
}

/// Startup recovery: enumerates non-terminal sessions in the store and
/// fails any whose last activity predates `stale_threshold` (spec §4.5).
pub async fn recover_stale_sessions(store: &SharedStore, events: &EventBus, stale_threshold: chrono::Duration) -> CoreResult<usize> {
    let now = SystemClock.now();
    let reaped = crate::store::reap_stale_sessions(store.as_ref(), stale_threshold, now).await?;
    for session_id in &reaped {
        events.publish(
            *session_id,
            EventKind::Terminal {
                phase: Phase::Failed,
                error: Some(CoreError::StaleSession(session_id.to_string()).to_string()),
            },
        );
    }
    info!(count = reaped.len(), "reaped stale sessions on startup");
    Ok(reaped.len())
}
