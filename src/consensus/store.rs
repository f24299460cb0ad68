use std::sync::Arc;

use tokio::sync::RwLock;

use super::message::NodeState;

/// One node's consensus state.
///
/// Anyone holding a clone can read a snapshot; only the consensus
/// processor in this crate writes.
#[derive(Clone, Debug)]
pub struct StateStore {
    state: Arc<RwLock<NodeState>>,
}

impl StateStore {
    pub fn new(initial: NodeState) -> Self {
        StateStore {
            state: Arc::new(RwLock::new(initial)),
        }
    }

    pub async fn read(&self) -> NodeState {
        self.state.read().await.clone()
    }

    pub(crate) async fn write<R>(&self, mutator: impl FnOnce(&mut NodeState) -> R) -> R {
        let mut state = self.state.write().await;
        mutator(&mut state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{common::config::RunConfig, consensus::message::Value};

    #[tokio::test]
    async fn test_read_returns_snapshot() {
        let store = StateStore::new(NodeState::initial(&RunConfig::new(0, 3, 1, Value::Zero, false)));
        let before = store.read().await;

        let k = store.write(|state| state.enter_rounds()).await;
        assert_eq!(k, Some(1));

        // The earlier snapshot is unaffected by the write
        assert_eq!(before.k, Some(0));
        assert_eq!(store.read().await.k, Some(1));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = StateStore::new(NodeState::initial(&RunConfig::new(0, 3, 1, Value::Zero, false)));
        let reader = store.clone();

        store.write(|state| state.kill()).await;
        assert!(reader.read().await.killed);
    }
}
