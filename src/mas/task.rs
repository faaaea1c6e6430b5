//! Task records: a top-level goal comprising an ordered, sequentially
//! executed list of stages.

use crate::mas::message::Message;
use crate::mas::stage::{Stage, StageExecutionState};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskExecutionState {
    Init,
    Running,
    Finished,
    Failed,
}

/// A per-step progress note: `shared_message_pool` entries, distinct from
/// the dispatcher's `shared_conversation_pool` of delivered envelopes (see
/// the "shared pools" design note).
#[derive(Debug, Clone)]
pub struct SharedMessageEntry {
    pub agent_id: String,
    pub role: String,
    pub stage_id: String,
    pub content: String,
}

/// Top-level goal. Owns its stage list, its outbound message queue, and the
/// two append-only logs.
///
/// `communication_queue` is modeled as an unbounded MPSC channel: many agent
/// workers enqueue (through the synchronizer) via a cloned `Sender`, and the
/// dispatcher is the sole owner of the `Receiver`, draining it
/// non-blockingly with `try_recv`.
pub struct Task {
    pub task_id: String,
    pub task_name: String,
    pub task_intention: String,
    pub task_manager: String,
    pub task_group: Vec<String>,
    pub stages: Vec<Stage>,
    pub execution_state: TaskExecutionState,
    pub shared_conversation_pool: Vec<(DateTime<Utc>, Message)>,
    pub shared_message_pool: Vec<SharedMessageEntry>,
    queue_tx: mpsc::UnboundedSender<Message>,
    queue_rx: mpsc::UnboundedReceiver<Message>,
}

impl Task {
    pub fn new(
        task_name: impl Into<String>,
        task_intention: impl Into<String>,
        task_manager: impl Into<String>,
        task_group: Vec<String>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            task_id: Uuid::new_v4().to_string(),
            task_name: task_name.into(),
            task_intention: task_intention.into(),
            task_manager: task_manager.into(),
            task_group,
            stages: Vec::new(),
            execution_state: TaskExecutionState::Init,
            shared_conversation_pool: Vec::new(),
            shared_message_pool: Vec::new(),
            queue_tx,
            queue_rx,
        }
    }

    /// A cloneable handle for enqueueing onto this task's outbound queue.
    /// Never blocks.
    pub fn sender(&self) -> mpsc::UnboundedSender<Message> {
        self.queue_tx.clone()
    }

    pub fn enqueue(&self, message: Message) {
        // An unbounded sender only errs if every receiver (including the one
        // this Task owns) has been dropped, which cannot happen while self
        // is alive.
        let _ = self.queue_tx.send(message);
    }

    /// Drains every message currently queued, without blocking.
    pub fn drain(&mut self) -> VecDeque<Message> {
        let mut drained = VecDeque::new();
        while let Ok(message) = self.queue_rx.try_recv() {
            drained.push_back(message);
        }
        drained
    }

    pub fn get_stage(&self, stage_id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.stage_id == stage_id)
    }

    pub fn get_stage_mut(&mut self, stage_id: &str) -> Option<&mut Stage> {
        self.stages.iter_mut().find(|s| s.stage_id == stage_id)
    }

    pub fn add_stage(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    /// The stage currently `running`, or the next `init` stage in order if
    /// none is running, or `None` if every stage is terminal.
    pub fn current_or_next_stage(&self) -> Option<&Stage> {
        if let Some(first) = self.stages.first() {
            if first.execution_state == StageExecutionState::Init {
                return Some(first);
            }
        } else {
            return None;
        }
        if let Some(running) = self.stages.iter().find(|s| s.execution_state == StageExecutionState::Running) {
            return Some(running);
        }
        let last_completed_index = self
            .stages
            .iter()
            .rposition(|s| matches!(s.execution_state, StageExecutionState::Finished | StageExecutionState::Failed));
        match last_completed_index {
            Some(idx) => self
                .stages
                .get(idx + 1)
                .filter(|s| s.execution_state == StageExecutionState::Init),
            None => None,
        }
    }

    pub fn add_shared_message(&mut self, agent_id: impl Into<String>, role: impl Into<String>, stage_id: impl Into<String>, content: impl Into<String>) {
        self.shared_message_pool.push(SharedMessageEntry {
            agent_id: agent_id.into(),
            role: role.into(),
            stage_id: stage_id.into(),
            content: content.into(),
        });
    }

    pub fn record_delivered(&mut self, message: Message) {
        self.shared_conversation_pool.push((Utc::now(), message));
    }
}
