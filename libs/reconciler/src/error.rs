use storetail_api::{RecordId, StoreError};

/// Шаг удаления, на котором сломался кандидат.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStage {
    /// Повторное чтение записи перед удалением байт.
    Lookup,
    Bytes,
    Metadata,
}

impl std::fmt::Display for DeleteStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeleteStage::Lookup => f.write_str("lookup"),
            DeleteStage::Bytes => f.write_str("bytes"),
            DeleteStage::Metadata => f.write_str("metadata"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("candidate scan failed: {0}")]
    ScanFailed(#[source] StoreError),

    #[error("purge of record {id} failed at {stage} stage: {source}")]
    DeleteFailed { id: RecordId, stage: DeleteStage, source: StoreError },

    #[error("invalid reconciler config: {0}")]
    Config(String),
}
