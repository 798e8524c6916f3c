//! Event tailer: возобновляемая подписка на mutation log, которая
//! сообщает о каждой записи, ставшей полной (`stored_at` выставлен),
//! и сохраняет checkpoint после каждого обработанного события.

mod config;
mod error;
mod handler;
mod tailer;

pub use config::{Backoff, StartPolicy, TailerConfig};
pub use error::TailerError;
pub use handler::{ChannelNotifier, CompletionHandler, LogNotifier, RecordCompleted};
pub use tailer::{EventTailer, TailerStats};
