use std::future::Future;
use std::pin::Pin;

use tokio::sync::RwLock;

use storetail_api::{Checkpoint, CheckpointStore, StoreError};

#[derive(Default)]
struct Slot {
    current: Option<Checkpoint>,
    history: Vec<Checkpoint>,
}

/// Checkpoint store без persistence. Хранит историю сохранений,
/// чтобы тесты могли проверять монотонность.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    slot: RwLock<Slot>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            slot: RwLock::new(Slot { current: Some(checkpoint), history: Vec::new() }),
        }
    }

    /// Все значения, переданные в `save`, по порядку.
    pub async fn history(&self) -> Vec<Checkpoint> {
        self.slot.read().await.history.clone()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>, StoreError>> + Send + '_>> {
        Box::pin(async move { Ok(self.slot.read().await.current.clone()) })
    }

    fn save(&self, checkpoint: &Checkpoint) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let checkpoint = checkpoint.clone();
        Box::pin(async move {
            let mut slot = self.slot.write().await;
            slot.history.push(checkpoint.clone());
            slot.current = Some(checkpoint);
            Ok(())
        })
    }
}
