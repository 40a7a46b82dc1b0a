//! Per-session event bus: bounded replay window, monotonic sequence
//! numbers, multi-subscriber fan-out, heartbeat ticker.
//!
//! Grounded on the teacher's `streaming::StreamingManager` (ring buffer +
//! per-subscriber channel fan-out) and `monitoring::AgentOutputStream`
//! (bounded `VecDeque` with an eviction policy).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::error::{CoreError, CoreResult};
use crate::model::{Event, EventKind, MessageKind, SessionId};

/// Events retained per session before the oldest evictable entry is dropped.
pub const RETENTION_WINDOW: usize = 1024;

/// How long a session may go without any published event before a
/// heartbeat is synthesized.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Never-evictable per spec §4.4: state-delta, task-update, phase, message
/// (other than progress chat), and terminal all survive eviction. Only
/// heartbeats, then progress messages, may be dropped to make room.
fn is_heartbeat(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Heartbeat)
}

fn is_progress_message(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Message { message } if message.kind == MessageKind::Progress)
}

/// One session's retained event log plus live subscriber registry.
struct SessionBus {
    log: VecDeque<Event>,
    next_seq: u64,
    earliest_seq: u64,
    subscribers: Vec<async_channel::Sender<Event>>,
    closed: bool,
    notify: Arc<Notify>,
}

impl SessionBus {
    fn new() -> Self {
        Self {
            log: VecDeque::new(),
            next_seq: 0,
            earliest_seq: 0,
            subscribers: Vec::new(),
            closed: false,
            notify: Arc::new(Notify::new()),
        }
    }

    fn push(&mut self, session_id: SessionId, kind: EventKind) -> Event {
        let seq = self.next_seq;
        self.next_seq += 1;
        let terminal = matches!(kind, EventKind::Terminal { .. });
        let event = Event {
            session_id,
            seq,
            timestamp: chrono::Utc::now(),
            kind,
        };

        if self.log.len() >= RETENTION_WINDOW {
            let evictable = self
                .log
                .iter()
                .position(|e| is_heartbeat(&e.kind))
                .or_else(|| self.log.iter().position(|e| is_progress_message(&e.kind)));
            if let Some(idx) = evictable {
                self.log.remove(idx);
            } else {
                self.log.pop_front();
            }
            self.earliest_seq = self.log.front().map(|e| e.seq).unwrap_or(seq);
        }
        self.log.push_back(event.clone());

        self.subscribers.retain(|tx| tx.try_send(event.clone()).is_ok() || !tx.is_closed());
        self.notify.notify_waiters();

        if terminal {
            self.closed = true;
        }
        event
    }

    fn replay_from(&self, from_sequence: u64) -> CoreResult<Vec<Event>> {
        if from_sequence > 0 && from_sequence < self.earliest_seq {
            return Err(CoreError::ReplayUnavailable {
                requested: from_sequence,
                earliest: self.earliest_seq,
            });
        }
        Ok(self
            .log
            .iter()
            .filter(|e| e.seq >= from_sequence)
            .cloned()
            .collect())
    }
}

/// Handle to a live subscription: an initial replay batch plus a receiver
/// for subsequent live events.
pub struct Subscription {
    pub replay: Vec<Event>,
    pub receiver: async_channel::Receiver<Event>,
}

/// Process-wide registry of per-session event buses.
#[derive(Clone)]
pub struct EventBus {
    sessions: Arc<DashMap<SessionId, SessionBus>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Publishes an event for `session_id`, assigning it the next sequence
    /// number. Never blocks: subscriber channels are bounded and a full
    /// channel simply misses that live event (it can still be replayed).
    pub fn publish(&self, session_id: SessionId, kind: EventKind) -> Event {
        let mut bus = self.sessions.entry(session_id).or_insert_with(SessionBus::new);
        let event = bus.push(session_id, kind);
        trace!(session = %session_id, seq = event.seq, "published event");
        event
    }

    /// Subscribes to `session_id` starting at `from_sequence`, returning the
    /// retained backlog plus a live receiver. Errors with
    /// `ReplayUnavailable` if `from_sequence` has already been evicted.
    pub fn subscribe(&self, session_id: SessionId, from_sequence: u64) -> CoreResult<Subscription> {
        let mut bus = self.sessions.entry(session_id).or_insert_with(SessionBus::new);
        let replay = bus.replay_from(from_sequence)?;
        let (tx, rx) = async_channel::bounded(RETENTION_WINDOW);
        if !bus.closed {
            bus.subscribers.push(tx);
        }
        Ok(Subscription { replay, receiver: rx })
    }

    /// Removes a session's bus entirely (called on purge).
    pub fn purge(&self, session_id: SessionId) {
        self.sessions.remove(&session_id);
        debug!(session = %session_id, "purged event bus");
    }

    /// Spawns the background heartbeat ticker for `session_id`: emits a
    /// heartbeat only if nothing else was published within the interval.
    /// Stops once the session's bus is closed (terminal event delivered)
    /// or removed (purged).
    pub fn spawn_heartbeat(&self, session_id: SessionId) -> tokio::task::JoinHandle<()> {
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            let mut last_seq_seen = None;
            loop {
                tokio::time::sleep(HEARTBEAT_INTERVAL).await;
                let Some(mut bus) = sessions.get_mut(&session_id) else {
                    break;
                };
                if bus.closed {
                    break;
                }
                if last_seq_seen == Some(bus.next_seq) {
                    bus.push(session_id, EventKind::Heartbeat);
                }
                last_seq_seen = Some(bus.next_seq);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Phase;

    fn sid() -> SessionId {
        SessionId::new_v4()
    }

    #[test]
    fn sequence_is_dense_and_increasing() {
        let bus = EventBus::new();
        let id = sid();
        for i in 0..5 {
            let e = bus.publish(id, EventKind::StateDelta { revision: i });
            assert_eq!(e.seq, i);
        }
    }

    #[test]
    fn replay_returns_events_from_cursor() {
        let bus = EventBus::new();
        let id = sid();
        for i in 0..10 {
            bus.publish(id, EventKind::StateDelta { revision: i });
        }
        let sub = bus.subscribe(id, 5).unwrap();
        assert_eq!(sub.replay.len(), 5);
        assert_eq!(sub.replay[0].seq, 5);
    }

    #[test]
    fn replay_before_window_errors() {
        let bus = EventBus::new();
        let id = sid();
        for i in 0..(RETENTION_WINDOW as u64 + 10) {
            bus.publish(id, EventKind::TaskUpdate {
                task_id: uuid::Uuid::new_v4(),
                status: crate::model::AgentStatus::Running,
                progress: 0.0,
            });
            let _ = i;
        }
        let err = bus.subscribe(id, 0).unwrap_err();
        assert!(matches!(err, CoreError::ReplayUnavailable { .. }));
    }

    #[test]
    fn terminal_event_closes_future_subscriptions_to_no_new_senders() {
        let bus = EventBus::new();
        let id = sid();
        bus.publish(id, EventKind::StateDelta { revision: 0 });
        bus.publish(
            id,
            EventKind::Terminal {
                phase: Phase::Done,
                error: None,
            },
        );
        let sub = bus.subscribe(id, 0).unwrap();
        assert_eq!(sub.replay.len(), 2);
    }
}
