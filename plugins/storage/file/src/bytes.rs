use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;

use storetail_api::{ByteStore, RecordId, StoreError};

use crate::fsutil::{blocking, io_err, write_atomic};

/// Blob area на диске: `{root}/{ID}/{ID}`.
///
/// Директория на запись нужна, чтобы очистка была одним
/// `remove_dir_all` и не оставляла сиротских файлов рядом.
#[derive(Clone)]
pub struct FileByteStore {
    root: PathBuf,
}

impl FileByteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn record_dir(&self, id: RecordId) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn blob_path(&self, id: RecordId) -> PathBuf {
        self.record_dir(id).join(id.to_string())
    }

    /// Прочитать байты записи (`None`, если файла нет).
    pub async fn read(&self, id: RecordId) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.blob_path(id);
        blocking(move || match std::fs::read(&path) {
            Ok(b) => Ok(Some(b)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(format!("read {}", path.display()), e)),
        })
        .await
    }
}

impl ByteStore for FileByteStore {
    fn write(&self, id: RecordId, bytes: Vec<u8>) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let path = self.blob_path(id);
        Box::pin(blocking(move || write_atomic(&path, &bytes)))
    }

    fn append(&self, id: RecordId, chunk: Vec<u8>) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let dir = self.record_dir(id);
        let path = self.blob_path(id);
        Box::pin(blocking(move || {
            std::fs::create_dir_all(&dir).map_err(|e| io_err(format!("mkdir {}", dir.display()), e))?;
            let mut f = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| io_err(format!("open {}", path.display()), e))?;
            f.write_all(&chunk).map_err(|e| io_err(format!("write {}", path.display()), e))?;
            f.sync_data().map_err(|e| io_err(format!("fsync {}", path.display()), e))
        }))
    }

    fn delete_all(&self, id: RecordId) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let dir = self.record_dir(id);
        Box::pin(blocking(move || match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(format!("remove {}", dir.display()), e)),
        }))
    }

    fn exists(&self, id: RecordId) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + '_>> {
        let dir = self.record_dir(id);
        Box::pin(blocking(move || {
            dir.try_exists().map_err(|e| io_err(format!("stat {}", dir.display()), e))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_accumulates_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileByteStore::new(dir.path());
        let id = RecordId::generate();
        store.append(id, b"hello ".to_vec()).await.unwrap();
        store.append(id, b"world".to_vec()).await.unwrap();
        assert_eq!(store.read(id).await.unwrap().as_deref(), Some(&b"hello world"[..]));
        assert!(dir.path().join(id.to_string()).join(id.to_string()).is_file());
    }

    #[tokio::test]
    async fn delete_all_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileByteStore::new(dir.path());
        let id = RecordId::generate();
        store.write(id, vec![1, 2, 3]).await.unwrap();
        // Посторонний файл в директории записи тоже уходит.
        std::fs::write(dir.path().join(id.to_string()).join("partial.tmp"), b"x").unwrap();

        assert!(store.exists(id).await.unwrap());
        store.delete_all(id).await.unwrap();
        assert!(!store.exists(id).await.unwrap());
        store.delete_all(id).await.unwrap();
    }
}
