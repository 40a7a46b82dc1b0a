//! Ready-set task scheduler: a task becomes ready once every dependency is
//! terminally successful; FIFO tie-break by insertion order; cycle
//! detection at insertion time (spec §4.1).

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{CoreError, CoreResult};
use crate::model::{AgentStatus, SessionId, Task, TaskId};

/// Tracks a session's task DAG and insertion order so the orchestrator can
/// ask "what is ready to run right now".
#[derive(Default)]
pub struct TaskGraph {
    tasks: HashMap<TaskId, Task>,
    insertion_order: VecDeque<TaskId>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `task`, rejecting it if its dependency edges would form a
    /// cycle with already-inserted tasks. Re-inserting an already-known id
    /// just updates its record in place (insertion order, hence FIFO
    /// tie-break, is fixed by the first insert).
    pub fn insert(&mut self, task: Task) -> CoreResult<()> {
        if self.tasks.contains_key(&task.id) {
            self.tasks.insert(task.id, task);
            return Ok(());
        }
        if self.would_cycle(&task) {
            return Err(CoreError::InvalidTaskGraph(task.session_id.to_string()));
        }
        self.insertion_order.push_back(task.id);
        self.tasks.insert(task.id, task);
        Ok(())
    }

    fn would_cycle(&self, candidate: &Task) -> bool {
        // DFS from each dependency looking for a path back to `candidate.id`.
        let mut visited = HashSet::new();
        let mut stack: Vec<TaskId> = candidate.dependencies.clone();
        while let Some(id) = stack.pop() {
            if id == candidate.id {
                return true;
            }
            if !visited.insert(id) {
                continue;
            }
            if let Some(t) = self.tasks.get(&id) {
                stack.extend(t.dependencies.iter().copied());
            }
        }
        false
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn children_of(&self, parent: TaskId) -> impl Iterator<Item = &Task> {
        self.tasks.values().filter(move |t| t.parent_id == Some(parent))
    }

    /// Tasks whose dependencies are all terminally successful, whose own
    /// status is still idle, in FIFO insertion order.
    pub fn ready_set(&self) -> Vec<TaskId> {
        self.insertion_order
            .iter()
            .copied()
            .filter(|id| {
                let Some(task) = self.tasks.get(id) else { return false };
                task.status == AgentStatus::Idle
                    && task
                        .dependencies
                        .iter()
                        .all(|dep| self.tasks.get(dep).map(|t| t.status == AgentStatus::Succeeded).unwrap_or(false))
            })
            .collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.tasks.values().filter(|t| t.status == AgentStatus::Running).count()
    }

    /// Weighted-mean progress rollup for `parent`'s direct children,
    /// defaulting to equal weights (spec §4.1).
    pub fn rollup_progress(&self, parent: TaskId) -> f64 {
        let children: Vec<&Task> = self.children_of(parent).collect();
        if children.is_empty() {
            return self.tasks.get(&parent).map(|t| t.progress).unwrap_or(0.0);
        }
        let total_weight: f64 = children.iter().map(|t| t.weight).sum();
        if total_weight == 0.0 {
            return 0.0;
        }
        children.iter().map(|t| t.progress * t.weight).sum::<f64>() / total_weight
    }
}

#[allow(dead_code)]
pub fn session_scoped(graph: &TaskGraph, session_id: SessionId) -> impl Iterator<Item = &Task> {
    graph.all().filter(move |t| t.session_id == session_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn new_task(session: SessionId, parent: Option<TaskId>) -> Task {
        Task::new(session, parent, "t", Utc::now())
    }

    #[test]
    fn independent_tasks_are_both_ready() {
        let mut graph = TaskGraph::new();
        let session = SessionId::new_v4();
        let a = new_task(session, None);
        let b = new_task(session, None);
        let (a_id, b_id) = (a.id, b.id);
        graph.insert(a).unwrap();
        graph.insert(b).unwrap();
        let ready = graph.ready_set();
        assert!(ready.contains(&a_id));
        assert!(ready.contains(&b_id));
    }

    #[test]
    fn dependent_task_waits_for_dependency() {
        let mut graph = TaskGraph::new();
        let session = SessionId::new_v4();
        let a = new_task(session, None);
        let a_id = a.id;
        let mut b = new_task(session, None);
        b.dependencies.push(a_id);
        let b_id = b.id;
        graph.insert(a).unwrap();
        graph.insert(b).unwrap();

        assert_eq!(graph.ready_set(), vec![a_id]);

        graph.get_mut(a_id).unwrap().status = AgentStatus::Succeeded;
        assert_eq!(graph.ready_set(), vec![b_id]);
    }

    #[test]
    fn self_referential_dependency_is_rejected() {
        let mut graph = TaskGraph::new();
        let session = SessionId::new_v4();
        let mut a = new_task(session, None);
        a.dependencies.push(a.id);
        assert!(graph.insert(a).is_err());
    }

    #[test]
    fn rollup_is_weighted_mean_of_children() {
        let mut graph = TaskGraph::new();
        let session = SessionId::new_v4();
        let parent = new_task(session, None);
        let parent_id = parent.id;
        graph.insert(parent).unwrap();

        let mut c1 = new_task(session, Some(parent_id));
        c1.progress = 1.0;
        let mut c2 = new_task(session, Some(parent_id));
        c2.progress = 0.0;
        graph.insert(c1).unwrap();
        graph.insert(c2).unwrap();

        assert!((graph.rollup_progress(parent_id) - 0.5).abs() < f64::EPSILON);
    }
}
