use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;

use storetail_api::{
    now_ms, DeleteOutcome, MutationEvent, Record, RecordId, RecordStore, StoreError,
};

use crate::config::{DataLayout, OpLine};
use crate::fsutil::{blocking, io_err, lock_exclusive, write_atomic};

// ════════════════════════════════════════════════════════════════
//  FileRecordStore
// ════════════════════════════════════════════════════════════════

/// Metadata store на файлах: одна запись — один `records/{ID}.json`.
///
/// Каждая мутация сначала атомарно заменяет файл записи, затем
/// дописывает строку в `oplog.jsonl`. Writer'ы сериализуются
/// mutex'ом внутри процесса и flock'ом на `records.lock` между
/// процессами, поэтому read-check-write (`insert`, `update_stored_at`,
/// `delete_if_incomplete`) атомарен, а порядок строк oplog совпадает
/// с порядком применения мутаций.
#[derive(Clone)]
pub struct FileRecordStore {
    records_dir: PathBuf,
    oplog_path: PathBuf,
    lock_path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileRecordStore {
    pub fn new(layout: &DataLayout) -> Self {
        Self {
            records_dir: layout.records_dir(),
            oplog_path: layout.oplog_path(),
            lock_path: layout.records_lock_path(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn record_path(&self, id: RecordId) -> PathBuf {
        self.records_dir.join(format!("{id}.json"))
    }
}

// ── Blocking helpers ──

fn read_record(path: &Path) -> Result<Option<Record>, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::from(e).with_context(format!("parse {}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(format!("read {}", path.display()), e)),
    }
}

fn write_record(path: &Path, record: &Record) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(record)?;
    write_atomic(path, &bytes)
}

fn remove_record(path: &Path) -> Result<bool, StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_err(format!("remove {}", path.display()), e)),
    }
}

/// Дописать событие в oplog одной строкой с `\n` на конце.
fn append_op(oplog: &Path, event: MutationEvent) -> Result<(), StoreError> {
    if let Some(parent) = oplog.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(format!("mkdir {}", parent.display()), e))?;
    }
    let mut line = serde_json::to_vec(&OpLine::new(event, now_ms()))?;
    line.push(b'\n');
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(oplog)
        .map_err(|e| io_err(format!("open {}", oplog.display()), e))?;
    f.write_all(&line).map_err(|e| io_err(format!("append {}", oplog.display()), e))?;
    f.sync_data().map_err(|e| io_err(format!("fsync {}", oplog.display()), e))
}

fn scan_incomplete(dir: &Path, threshold_ms: i64, limit: usize) -> Result<Vec<Record>, StoreError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(format!("read_dir {}", dir.display()), e)),
    };

    let mut found = Vec::new();
    for entry in entries {
        if found.len() >= limit {
            break;
        }
        let entry = entry.map_err(|e| io_err(format!("read_dir {}", dir.display()), e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match read_record(&path) {
            Ok(Some(record)) if record.is_incomplete_before(threshold_ms) => found.push(record),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = ?e, "skipping unreadable record file");
            }
        }
    }
    Ok(found)
}

// ════════════════════════════════════════════════════════════════
//  RecordStore impl
// ════════════════════════════════════════════════════════════════

impl RecordStore for FileRecordStore {
    fn insert(&self, record: Record) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let path = self.record_path(record.id);
            let oplog = self.oplog_path.clone();
            let lock_path = self.lock_path.clone();
            blocking(move || {
                let _lock = lock_exclusive(&lock_path)?;
                if path.exists() {
                    return Err(StoreError::conflict(format!("record {} already exists", record.id)));
                }
                write_record(&path, &record)?;
                append_op(&oplog, MutationEvent::insert(record.id))
            })
            .await
        })
    }

    fn update_stored_at(
        &self,
        id: RecordId,
        stored_at_ms: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let path = self.record_path(id);
            let oplog = self.oplog_path.clone();
            let lock_path = self.lock_path.clone();
            blocking(move || {
                let _lock = lock_exclusive(&lock_path)?;
                let mut record = read_record(&path)?
                    .ok_or_else(|| StoreError::not_found(format!("record {id} not found")))?;
                record.check_completion(stored_at_ms)?;
                record.stored_at_ms = Some(stored_at_ms);
                write_record(&path, &record)?;
                append_op(&oplog, MutationEvent::stored(id))
            })
            .await
        })
    }

    fn get(&self, id: RecordId) -> Pin<Box<dyn Future<Output = Result<Option<Record>, StoreError>> + Send + '_>> {
        let path = self.record_path(id);
        Box::pin(blocking(move || read_record(&path)))
    }

    fn find_incomplete_older_than(
        &self,
        threshold_ms: i64,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Record>, StoreError>> + Send + '_>> {
        let dir = self.records_dir.clone();
        Box::pin(blocking(move || scan_incomplete(&dir, threshold_ms, limit)))
    }

    fn delete_by_id(&self, id: RecordId) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let path = self.record_path(id);
            let oplog = self.oplog_path.clone();
            let lock_path = self.lock_path.clone();
            blocking(move || {
                let _lock = lock_exclusive(&lock_path)?;
                if remove_record(&path)? {
                    append_op(&oplog, MutationEvent::delete(id))?;
                }
                Ok(())
            })
            .await
        })
    }

    fn delete_if_incomplete(
        &self,
        id: RecordId,
    ) -> Pin<Box<dyn Future<Output = Result<DeleteOutcome, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let path = self.record_path(id);
            let oplog = self.oplog_path.clone();
            let lock_path = self.lock_path.clone();
            blocking(move || {
                let _lock = lock_exclusive(&lock_path)?;
                match read_record(&path)? {
                    None => Ok(DeleteOutcome::Absent),
                    Some(r) if r.is_complete() => Ok(DeleteOutcome::Completed),
                    Some(_) => {
                        if !remove_record(&path)? {
                            return Ok(DeleteOutcome::Absent);
                        }
                        append_op(&oplog, MutationEvent::delete(id))?;
                        Ok(DeleteOutcome::Deleted)
                    }
                }
            })
            .await
        })
    }
}
