use storetail_api::{RecordId, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum TailerError {
    #[error("tailer cancelled")]
    Cancelled,

    #[error("subscription failed: {0}")]
    Subscription(#[source] StoreError),

    /// Лог больше не хранит позицию checkpoint'а. Нужен ручной сброс.
    #[error("checkpoint expired: {0}")]
    CheckpointExpired(#[source] StoreError),

    #[error("checkpoint persistence: {0}")]
    Persistence(#[source] StoreError),

    #[error("malformed event: {reason}")]
    MalformedEvent { reason: String },

    #[error("completion handler failed for record {record_id}: {source}")]
    Handler { record_id: RecordId, source: StoreError },

    #[error("invalid tailer config: {0}")]
    Config(String),
}

impl TailerError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TailerError::Cancelled)
    }
}
