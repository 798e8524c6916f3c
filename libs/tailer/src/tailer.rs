use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use storetail_api::{
    ChangeFilter, ChangeStream, Checkpoint, CheckpointStore, ErrorKind, MutationLog, StoreError,
};

use crate::config::{Backoff, StartPolicy, TailerConfig};
use crate::handler::{CompletionHandler, RecordCompleted};
use crate::TailerError;

// ═══════════════════════════════════════════════════════════════
//  Stats
// ═══════════════════════════════════════════════════════════════

/// Счётчики, доступные во время работы tailer'а.
#[derive(Debug, Default)]
pub struct TailerStats {
    processed: AtomicU64,
    skipped: AtomicU64,
    resubscriptions: AtomicU64,
}

impl TailerStats {
    /// Событий, обработанных handler'ом и закреплённых checkpoint'ом.
    pub fn events_processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Событий, не прошедших фильтр на стороне клиента.
    pub fn events_skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn resubscriptions(&self) -> u64 {
        self.resubscriptions.load(Ordering::Relaxed)
    }
}

/// Почему прервалось чтение одной подписки.
enum Interrupt {
    /// Поток закрылся или вернул ошибку: решает `on_failure`.
    Stream(StoreError),
    Fatal(TailerError),
}

// ═══════════════════════════════════════════════════════════════
//  EventTailer
// ═══════════════════════════════════════════════════════════════

/// Подписка на mutation log: фильтр "stored" → handler → checkpoint.
///
/// Checkpoint события сохраняется только после успешного handler'а,
/// поэтому после crash'а событие будет доставлено повторно, но не
/// потеряно. Переподписка всегда идёт от последнего сохранённого
/// checkpoint'а (или от стартовой позиции, если ещё ничего не сохранено).
pub struct EventTailer {
    log: Arc<dyn MutationLog>,
    checkpoints: Arc<dyn CheckpointStore>,
    handler: Arc<dyn CompletionHandler>,
    config: TailerConfig,
    filter: ChangeFilter,
    stats: TailerStats,
}

impl EventTailer {
    pub fn new(
        log: Arc<dyn MutationLog>,
        checkpoints: Arc<dyn CheckpointStore>,
        handler: Arc<dyn CompletionHandler>,
        config: TailerConfig,
    ) -> Self {
        Self {
            log,
            checkpoints,
            handler,
            config,
            filter: ChangeFilter::stored(),
            stats: TailerStats::default(),
        }
    }

    pub fn stats(&self) -> &TailerStats {
        &self.stats
    }

    /// Крутиться, пока не отменят или не случится фатальная ошибка.
    /// `Ok` не возвращается никогда: отмена — это `TailerError::Cancelled`.
    pub async fn run(&self, token: CancellationToken) -> Result<(), TailerError> {
        self.config.validate()?;
        let mut backoff = self.config.backoff();
        let mut failures = 0u32;

        let mut position = self.start_position(&token, &mut backoff, &mut failures).await?;

        loop {
            if token.is_cancelled() {
                return Err(TailerError::Cancelled);
            }

            let mut stream = match self.log.subscribe(&self.filter, position.as_ref()).await {
                Ok(s) => s,
                Err(e) => {
                    self.on_failure(e, &token, &mut backoff, &mut failures).await?;
                    continue;
                }
            };
            tracing::info!(checkpoint = ?position, "subscription opened");

            let outcome = self
                .drain(&mut *stream, &mut position, &token, &mut backoff, &mut failures)
                .await;
            stream.close().await;

            match outcome {
                Interrupt::Fatal(e) => return Err(e),
                Interrupt::Stream(e) => {
                    self.on_failure(e, &token, &mut backoff, &mut failures).await?;
                    self.stats.resubscriptions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Сохранённый checkpoint, либо позиция по `StartPolicy`.
    /// Позиция `Latest` не сохраняется: до первого события переподписка
    /// идёт от неё же, так что ничего не теряется.
    async fn start_position(
        &self,
        token: &CancellationToken,
        backoff: &mut Backoff,
        failures: &mut u32,
    ) -> Result<Option<Checkpoint>, TailerError> {
        if let Some(cp) = self.checkpoints.load().await.map_err(TailerError::Persistence)? {
            tracing::info!(checkpoint = %cp, "resuming from persisted checkpoint");
            return Ok(Some(cp));
        }

        match self.config.start {
            StartPolicy::Earliest => {
                tracing::info!("no checkpoint, starting from earliest retained event");
                Ok(None)
            }
            StartPolicy::Latest => loop {
                match self.log.head().await {
                    Ok(head) => {
                        tracing::info!(head = ?head, "no checkpoint, starting from log head");
                        return Ok(head);
                    }
                    Err(e) => self.on_failure(e, token, backoff, failures).await?,
                }
            },
        }
    }

    /// Читать подписку до ошибки, конца потока или отмены.
    async fn drain(
        &self,
        stream: &mut dyn ChangeStream,
        position: &mut Option<Checkpoint>,
        token: &CancellationToken,
        backoff: &mut Backoff,
        failures: &mut u32,
    ) -> Interrupt {
        loop {
            let item = tokio::select! {
                biased;
                _ = token.cancelled() => return Interrupt::Fatal(TailerError::Cancelled),
                item = stream.next() => item,
            };

            let envelope = match item {
                None => return Interrupt::Stream(StoreError::io("change stream ended")),
                Some(Err(e)) if e.kind() == ErrorKind::Format => {
                    return Interrupt::Fatal(TailerError::MalformedEvent {
                        reason: format!("after checkpoint {position:?}: {e}"),
                    });
                }
                Some(Err(e)) => return Interrupt::Stream(e),
                Some(Ok(envelope)) => envelope,
            };

            if !self.filter.matches(&envelope.event) {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    record_id = %envelope.event.record_id,
                    kind = %envelope.event.kind,
                    "event does not match filter, skipping"
                );
                continue;
            }
            if envelope.event.record_id.is_nil() {
                return Interrupt::Fatal(TailerError::MalformedEvent {
                    reason: format!("nil record id at checkpoint {}", envelope.checkpoint),
                });
            }

            let record_id = envelope.event.record_id;
            let completed = RecordCompleted { record_id, checkpoint: envelope.checkpoint.clone() };
            // Зависший получатель не должен держать shutdown; checkpoint
            // при отмене не сохраняется, событие придёт повторно.
            let handled = tokio::select! {
                biased;
                _ = token.cancelled() => return Interrupt::Fatal(TailerError::Cancelled),
                result = self.handler.on_completed(completed) => result,
            };
            if let Err(source) = handled {
                tracing::error!(%record_id, error = %source, "completion handler failed");
                return Interrupt::Fatal(TailerError::Handler { record_id, source });
            }
            if let Err(e) = self.checkpoints.save(&envelope.checkpoint).await {
                return Interrupt::Fatal(TailerError::Persistence(e));
            }
            tracing::debug!(%record_id, checkpoint = %envelope.checkpoint, "checkpoint persisted");

            *position = Some(envelope.checkpoint);
            self.stats.processed.fetch_add(1, Ordering::Relaxed);
            backoff.reset();
            *failures = 0;
        }
    }

    /// Транзиентная ошибка → пауза и `Ok` (вызывающий переподпишется).
    /// Всё остальное фатально.
    async fn on_failure(
        &self,
        error: StoreError,
        token: &CancellationToken,
        backoff: &mut Backoff,
        failures: &mut u32,
    ) -> Result<(), TailerError> {
        if error.kind() == ErrorKind::Expired {
            tracing::error!(error = %error, "checkpoint is no longer retained by the log");
            return Err(TailerError::CheckpointExpired(error));
        }
        if !error.is_transient() {
            tracing::error!(error = ?error, "subscription failed");
            return Err(TailerError::Subscription(error));
        }

        *failures += 1;
        if let Some(max) = self.config.max_retries {
            if *failures > max {
                tracing::error!(attempts = *failures, error = %error, "giving up on subscription");
                return Err(TailerError::Subscription(error));
            }
        }

        let delay = backoff.next_delay();
        tracing::warn!(attempt = *failures, delay_ms = delay.as_millis() as u64, error = %error, "resubscribing");
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(TailerError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
