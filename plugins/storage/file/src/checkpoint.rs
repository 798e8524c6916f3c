use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use storetail_api::{Checkpoint, CheckpointStore, StoreError};

use crate::fsutil::{blocking, io_err, write_atomic};

// ════════════════════════════════════════════════════════════════
//  FileCheckpointStore
// ════════════════════════════════════════════════════════════════

/// Checkpoint tailer'а в одном файле. Содержимое — сырые байты
/// checkpoint'а без обёрток. Замена атомарна (tmp + rename).
#[derive(Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>, StoreError>> + Send + '_>> {
        let path = self.path.clone();
        Box::pin(blocking(move || match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => Err(StoreError::format_err(format!(
                "checkpoint file {} is empty",
                path.display()
            ))),
            Ok(bytes) => Ok(Some(Checkpoint::from_bytes(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(format!("read {}", path.display()), e)),
        }))
    }

    fn save(&self, checkpoint: &Checkpoint) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let path = self.path.clone();
        let bytes = checkpoint.as_bytes().to_vec();
        Box::pin(async move {
            if bytes.is_empty() {
                return Err(StoreError::new("refusing to persist an empty checkpoint"));
            }
            blocking(move || write_atomic(&path, &bytes)).await
        })
    }
}
