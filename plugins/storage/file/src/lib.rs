//! Файловые backends: записи в `records/`, байты в `blobs/`,
//! mutation log в `oplog.jsonl`, checkpoint tailer'а в `tailer/`.
//!
//! Несколько процессов могут работать с одним `data_dir`: tailer
//! только читает oplog, writer'ы записей сериализуются flock'ом на
//! `records.lock` и только дописывают в oplog.

mod bytes;
mod checkpoint;
mod config;
mod fsutil;
mod oplog;
mod records;

use std::sync::Arc;

use storetail_api::StoreError;

pub use bytes::FileByteStore;
pub use checkpoint::FileCheckpointStore;
pub use config::{DataLayout, FileBackendConfig};
pub use oplog::{FileChangeStream, FileMutationLog};
pub use records::FileRecordStore;

/// Все backends над одним `data_dir`.
#[derive(Clone)]
pub struct FileBackend {
    pub layout: DataLayout,
    pub records: Arc<FileRecordStore>,
    pub bytes: Arc<FileByteStore>,
    pub log: Arc<FileMutationLog>,
    pub checkpoints: Arc<FileCheckpointStore>,
}

impl FileBackend {
    /// Создать каталоги и собрать backends. Ошибка здесь — ошибка
    /// конфигурации (нет прав, путь занят файлом).
    pub fn open(cfg: &FileBackendConfig) -> Result<Self, StoreError> {
        let layout = cfg.layout();
        for dir in [layout.root().to_path_buf(), layout.records_dir(), layout.blobs_dir()] {
            std::fs::create_dir_all(&dir)
                .map_err(|e| StoreError::config(format!("mkdir {}: {e}", dir.display())))?;
        }
        Ok(Self {
            records: Arc::new(FileRecordStore::new(&layout)),
            bytes: Arc::new(FileByteStore::new(layout.blobs_dir())),
            log: Arc::new(FileMutationLog::new(layout.oplog_path(), cfg.poll_interval())),
            checkpoints: Arc::new(FileCheckpointStore::new(layout.checkpoint_path())),
            layout,
        })
    }
}
