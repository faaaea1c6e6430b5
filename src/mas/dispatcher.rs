//! The message dispatcher (§4.7): drains every task's outbound queue and
//! delivers to addressed agents.

use crate::mas::agent::AgentRuntime;
use crate::mas::config::MasConfig;
use crate::mas::synchronizer::Synchronizer;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Cooperatively scheduled loop draining every task's `communication_queue`
/// and delivering messages to addressed agents' intake methods.
pub struct MessageDispatcher {
    synchronizer: Arc<Synchronizer>,
    agents: Arc<RwLock<HashMap<String, Arc<AgentRuntime>>>>,
}

impl MessageDispatcher {
    pub fn new(synchronizer: Arc<Synchronizer>, agents: Arc<RwLock<HashMap<String, Arc<AgentRuntime>>>>) -> Arc<Self> {
        Arc::new(Self { synchronizer, agents })
    }

    pub async fn run(self: Arc<Self>, config: MasConfig, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            self.dispatch_once().await;
            tokio::select! {
                _ = tokio::time::sleep(config.dispatcher_poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Drains every registered task's queue once, delivering each message to
    /// its receivers and logging the delivered envelope to that task's
    /// `shared_conversation_pool` (§4.7).
    pub async fn dispatch_once(&self) {
        let task_ids: Vec<String> = self.synchronizer.snapshot_all().await.into_iter().map(|t| t.task_id).collect();
        let agents = self.agents.read().await;

        for task_id in task_ids {
            let drained = self.synchronizer.drain_task_queue(&task_id).await;
            for message in drained {
                let mut delivered = false;
                for receiver_id in &message.receiver {
                    match agents.get(receiver_id) {
                        Some(agent) => {
                            agent.receive_message(message.clone()).await;
                            delivered = true;
                        }
                        None => {
                            log::warn!("dispatcher: receiver {} not registered, dropping message for task {}", receiver_id, task_id);
                        }
                    }
                }
                if delivered {
                    self.synchronizer.record_delivered(&task_id, message).await;
                }
            }
        }
    }
}
