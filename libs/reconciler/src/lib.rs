//! Orphan reconciler: находит записи, которые так и не стали полными
//! за окно удержания, и удаляет их байты, а затем метаданные.

mod config;
mod error;
mod report;
mod sweep;

pub use config::ReconcilerConfig;
pub use error::{DeleteStage, ReconcileError};
pub use report::{SweepReport, SweepStatus};
pub use sweep::{OrphanReconciler, PurgeOutcome};
