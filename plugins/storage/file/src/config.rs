use std::path::{Path, PathBuf};
use std::time::Duration;

use storetail_api::{MutationEvent, OperationKind, RecordId};

// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

fn default_data_dir() -> String {
    "data".into()
}
fn default_poll_interval_ms() -> u64 {
    200
}

/// Конфигурация файлового backend'а.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct FileBackendConfig {
    /// Корень: `records/`, `blobs/`, `oplog.jsonl`, `tailer/`.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Как часто подписка перечитывает oplog, дойдя до конца файла.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for FileBackendConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl FileBackendConfig {
    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

// ════════════════════════════════════════════════════════════════
//  Directory layout
// ════════════════════════════════════════════════════════════════

/// Раскладка файлов под `data_dir`:
///
/// ```text
/// {data_dir}/records/{ID}.json      метаданные записи
/// {data_dir}/blobs/{ID}/{ID}        байты записи
/// {data_dir}/oplog.jsonl            mutation log
/// {data_dir}/records.lock           advisory lock writer'ов записей
/// {data_dir}/tailer/resume_token    checkpoint tailer'а
/// ```
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn records_dir(&self) -> PathBuf {
        self.root.join("records")
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    pub fn oplog_path(&self) -> PathBuf {
        self.root.join("oplog.jsonl")
    }

    pub fn records_lock_path(&self) -> PathBuf {
        self.root.join("records.lock")
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.root.join("tailer").join("resume_token")
    }
}

// ════════════════════════════════════════════════════════════════
//  On-disk formats
// ════════════════════════════════════════════════════════════════

/// Строка oplog.jsonl.
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct OpLine {
    pub op: OperationKind,
    pub record_id: RecordId,
    #[serde(default)]
    pub fields: Vec<String>,
    pub ts_ms: i64,
}

impl OpLine {
    pub fn new(event: MutationEvent, ts_ms: i64) -> Self {
        Self {
            op: event.kind,
            record_id: event.record_id,
            fields: event.updated_fields,
            ts_ms,
        }
    }

    pub fn into_event(self) -> MutationEvent {
        MutationEvent {
            kind: self.op,
            record_id: self.record_id,
            updated_fields: self.fields,
        }
    }
}
