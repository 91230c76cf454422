//! Outbound event stream
//!
//! Events are published on a `tokio::sync::broadcast` channel for live
//! consumers (dashboards, reports) and kept in a bounded replay log. Publishing
//! never waits on consumers: a send with no subscribers is not an error.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::ids::{CycleId, TaskId, VentureId, WorkerId};

/// Default broadcast buffer and replay log size
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Engine events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgoraEvent {
    TaskAssigned {
        task_id: TaskId,
        worker_id: WorkerId,
        score: f64,
    },
    TaskUnmatched {
        task_id: TaskId,
        best_score: Option<f64>,
    },
    TaskCompleted {
        task_id: TaskId,
        worker_id: WorkerId,
        quality: f64,
    },
    TaskFailed {
        task_id: TaskId,
        worker_id: Option<WorkerId>,
        requeued: bool,
        reason: String,
    },
    RewardIssued {
        worker_id: WorkerId,
        task_id: Option<TaskId>,
        amount: Decimal,
    },
    RewardDeferred {
        worker_id: WorkerId,
        amount: Decimal,
        reason: String,
    },
    RankCycleResult {
        cycle_id: CycleId,
        promoted: Vec<WorkerId>,
        retained: Vec<WorkerId>,
        removed: Vec<WorkerId>,
        redistributed_amount: Decimal,
    },
    VenturePhaseAdvanced {
        venture_id: VentureId,
        from_phase: String,
        to_phase: Option<String>,
    },
    VentureBlocked {
        venture_id: VentureId,
        phase: String,
        tasks: Vec<TaskId>,
    },
}

impl AgoraEvent {
    /// Short event name for logs and metrics labels
    pub fn name(&self) -> &'static str {
        match self {
            AgoraEvent::TaskAssigned { .. } => "task_assigned",
            AgoraEvent::TaskUnmatched { .. } => "task_unmatched",
            AgoraEvent::TaskCompleted { .. } => "task_completed",
            AgoraEvent::TaskFailed { .. } => "task_failed",
            AgoraEvent::RewardIssued { .. } => "reward_issued",
            AgoraEvent::RewardDeferred { .. } => "reward_deferred",
            AgoraEvent::RankCycleResult { .. } => "rank_cycle_result",
            AgoraEvent::VenturePhaseAdvanced { .. } => "venture_phase_advanced",
            AgoraEvent::VentureBlocked { .. } => "venture_blocked",
        }
    }
}

/// Event with its position in the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedEvent {
    pub sequence: u64,
    pub timestamp: i64,
    pub event: AgoraEvent,
}

/// Fire-and-forget event bus with a bounded replay log
pub struct EventBus {
    tx: broadcast::Sender<SequencedEvent>,
    log: RwLock<VecDeque<SequencedEvent>>,
    next_sequence: AtomicU64,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            log: RwLock::new(VecDeque::with_capacity(capacity)),
            next_sequence: AtomicU64::new(0),
            capacity,
        }
    }

    /// Publish an event; returns its sequence number
    pub fn publish(&self, event: AgoraEvent) -> u64 {
        let sequenced = {
            let mut log = self.log.write();
            let sequenced = SequencedEvent {
                sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
                timestamp: crate::now_millis(),
                event,
            };
            if log.len() == self.capacity {
                log.pop_front();
            }
            log.push_back(sequenced.clone());
            sequenced
        };

        let sequence = sequenced.sequence;
        if self.tx.send(sequenced).is_err() {
            trace!(sequence, "No live event subscribers");
        }
        sequence
    }

    /// Subscribe to live events
    pub fn subscribe(&self) -> broadcast::Receiver<SequencedEvent> {
        self.tx.subscribe()
    }

    /// Replay retained events with `sequence >= from`
    pub fn since(&self, from: u64) -> Vec<SequencedEvent> {
        self.log
            .read()
            .iter()
            .filter(|e| e.sequence >= from)
            .cloned()
            .collect()
    }

    /// Most recent `limit` events, oldest first
    pub fn recent(&self, limit: usize) -> Vec<SequencedEvent> {
        let log = self.log.read();
        let skip = log.len().saturating_sub(limit);
        log.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.log.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.read().is_empty()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unmatched() -> AgoraEvent {
        AgoraEvent::TaskUnmatched {
            task_id: TaskId::new(),
            best_score: Some(0.6),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(8);
        assert_eq!(bus.publish(unmatched()), 0);
        assert_eq!(bus.publish(unmatched()), 1);
        assert_eq!(bus.len(), 2);
    }

    #[test]
    fn test_replay_log_bounded() {
        let bus = EventBus::new(3);
        for _ in 0..5 {
            bus.publish(unmatched());
        }
        let events = bus.recent(10);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].sequence, 2);
        assert_eq!(bus.since(4).len(), 1);
    }

    #[tokio::test]
    async fn test_live_subscriber_receives() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(unmatched());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event.name(), "task_unmatched");
    }

    #[test]
    fn test_event_json_tag() {
        let json = serde_json::to_string(&unmatched()).unwrap();
        assert!(json.contains("\"type\":\"task_unmatched\""));
    }
}
