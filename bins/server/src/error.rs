use storetail_api::StoreError;
use storetail_reconciler::ReconcileError;
use storetail_tailer::TailerError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("tailer: {0}")]
    Tailer(#[from] TailerError),

    #[error("reconciler: {0}")]
    Reconcile(#[from] ReconcileError),
}
