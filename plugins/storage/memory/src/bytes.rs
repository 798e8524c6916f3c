use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::RwLock;

use storetail_api::{ByteStore, RecordId, StoreError};

/// In-memory blob area: один буфер на запись.
#[derive(Default)]
pub struct MemoryByteStore {
    blobs: RwLock<HashMap<RecordId, Vec<u8>>>,
}

impl MemoryByteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn blob_len(&self, id: RecordId) -> Option<usize> {
        self.blobs.read().await.get(&id).map(Vec::len)
    }

    pub async fn blob_count(&self) -> usize {
        self.blobs.read().await.len()
    }
}

impl ByteStore for MemoryByteStore {
    fn write(&self, id: RecordId, bytes: Vec<u8>) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.blobs.write().await.insert(id, bytes);
            Ok(())
        })
    }

    fn append(&self, id: RecordId, chunk: Vec<u8>) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.blobs.write().await.entry(id).or_default().extend_from_slice(&chunk);
            Ok(())
        })
    }

    fn delete_all(&self, id: RecordId) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.blobs.write().await.remove(&id);
            Ok(())
        })
    }

    fn exists(&self, id: RecordId) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + '_>> {
        Box::pin(async move { Ok(self.blobs.read().await.contains_key(&id)) })
    }
}
