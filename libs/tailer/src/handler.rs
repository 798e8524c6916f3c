use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use storetail_api::{Checkpoint, RecordId, StoreError};

/// Уведомление "запись стала полной".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordCompleted {
    pub record_id: RecordId,
    /// Позиция события в логе.
    pub checkpoint: Checkpoint,
}

/// Получатель уведомлений tailer'а.
///
/// Доставка at-least-once: после рестарта одно и то же уведомление
/// может прийти повторно, реализация должна быть идемпотентной по
/// `record_id`. Ошибка останавливает tailer, checkpoint не сдвигается.
pub trait CompletionHandler: Send + Sync {
    fn on_completed(&self, event: RecordCompleted) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;
}

/// Пишет каждое завершение одной строкой лога.
pub struct LogNotifier;

impl CompletionHandler for LogNotifier {
    fn on_completed(&self, event: RecordCompleted) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(record_id = %event.record_id, checkpoint = %event.checkpoint, "record completed");
            Ok(())
        })
    }
}

/// Пересылает уведомления в mpsc-канал.
pub struct ChannelNotifier {
    tx: mpsc::Sender<RecordCompleted>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::Sender<RecordCompleted>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RecordCompleted>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl CompletionHandler for ChannelNotifier {
    fn on_completed(&self, event: RecordCompleted) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            let record_id = event.record_id;
            self.tx
                .send(event)
                .await
                .map_err(|_| StoreError::new(format!("completion receiver dropped (record {record_id})")))
        })
    }
}
