use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use storetail_api::util::{checkpoint_position, position_checkpoint};
use storetail_api::{
    ChangeEnvelope, ChangeFilter, ChangeStream, Checkpoint, DeleteOutcome, MutationEvent,
    MutationLog, Record, RecordId, RecordStore, StoreError,
};

fn default_log_retention() -> usize {
    100_000
}

// ═══════════════════════════════════════════════════════════════
//  State
// ═══════════════════════════════════════════════════════════════

struct LogEntry {
    seq: u64,
    event: MutationEvent,
}

struct State {
    records: HashMap<RecordId, Record>,
    log: VecDeque<LogEntry>,
    /// seq следующего события. Первое событие получает seq 1.
    next_seq: u64,
    /// seq самого старого хранимого события (`next_seq`, если лог пуст).
    first_retained: u64,
}

impl State {
    fn append(&mut self, event: MutationEvent, retention: usize) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.log.push_back(LogEntry { seq, event });
        while self.log.len() > retention {
            self.log.pop_front();
        }
        self.first_retained = self.log.front().map(|e| e.seq).unwrap_or(self.next_seq);
    }
}

struct Shared {
    state: RwLock<State>,
    /// Unit-сигнал на каждое новое событие лога.
    notify_tx: broadcast::Sender<()>,
    log_retention: usize,
}

impl Shared {
    fn notify(&self) {
        // Нет подписчиков — нормально.
        let _ = self.notify_tx.send(());
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStore
// ═══════════════════════════════════════════════════════════════

/// In-memory record store вместе с собственным mutation log.
///
/// Каждая мутация записи атомарно (под одним write lock) попадает
/// в лог с монотонным seq; checkpoint — это seq в big-endian.
/// Лог хранит не больше `log_retention` последних событий, более
/// старые позиции возобновить нельзя (`ErrorKind::Expired`).
///
/// Клонирование дешёвое: все клоны видят одно состояние.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_log_retention(default_log_retention())
    }

    pub fn with_log_retention(max_events: usize) -> Self {
        let (notify_tx, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(State {
                    records: HashMap::new(),
                    log: VecDeque::new(),
                    next_seq: 1,
                    first_retained: 1,
                }),
                notify_tx,
                log_retention: max_events.max(1),
            }),
        }
    }

    /// Дописать событие в лог, не трогая записи. Для событий, которые
    /// порождают внешние writer'ы (например, update других полей).
    pub async fn append_event(&self, event: MutationEvent) {
        let mut state = self.shared.state.write().await;
        state.append(event, self.shared.log_retention);
        drop(state);
        self.shared.notify();
    }

    pub async fn record_count(&self) -> usize {
        self.shared.state.read().await.records.len()
    }

    pub async fn log_len(&self) -> usize {
        self.shared.state.read().await.log.len()
    }

    async fn write_with_event<T>(
        &self,
        op: impl FnOnce(&mut HashMap<RecordId, Record>) -> Result<(T, Option<MutationEvent>), StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.shared.state.write().await;
        let (value, event) = op(&mut state.records)?;
        let appended = event.is_some();
        if let Some(event) = event {
            state.append(event, self.shared.log_retention);
        }
        drop(state);
        if appended {
            self.shared.notify();
        }
        Ok(value)
    }
}

// ═══════════════════════════════════════════════════════════════
//  RecordStore impl
// ═══════════════════════════════════════════════════════════════

impl RecordStore for MemoryStore {
    fn insert(&self, record: Record) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.write_with_event(|records| {
                if records.contains_key(&record.id) {
                    return Err(StoreError::conflict(format!("record {} already exists", record.id)));
                }
                let event = MutationEvent::insert(record.id);
                records.insert(record.id, record);
                Ok(((), Some(event)))
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
            self.write_with_event(|records| {
                let record = records
                    .get_mut(&id)
                    .ok_or_else(|| StoreError::not_found(format!("record {id} not found")))?;
                record.check_completion(stored_at_ms)?;
                record.stored_at_ms = Some(stored_at_ms);
                Ok(((), Some(MutationEvent::stored(id))))
            })
            .await
        })
    }

    fn get(&self, id: RecordId) -> Pin<Box<dyn Future<Output = Result<Option<Record>, StoreError>> + Send + '_>> {
        Box::pin(async move { Ok(self.shared.state.read().await.records.get(&id).cloned()) })
    }

    fn find_incomplete_older_than(
        &self,
        threshold_ms: i64,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Record>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let state = self.shared.state.read().await;
            Ok(state
                .records
                .values()
                .filter(|r| r.is_incomplete_before(threshold_ms))
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn delete_by_id(&self, id: RecordId) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.write_with_event(|records| {
                let event = records.remove(&id).map(|_| MutationEvent::delete(id));
                Ok(((), event))
            })
            .await
        })
    }

    fn delete_if_incomplete(
        &self,
        id: RecordId,
    ) -> Pin<Box<dyn Future<Output = Result<DeleteOutcome, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.write_with_event(|records| match records.get(&id) {
                None => Ok((DeleteOutcome::Absent, None)),
                Some(r) if r.is_complete() => Ok((DeleteOutcome::Completed, None)),
                Some(_) => {
                    records.remove(&id);
                    Ok((DeleteOutcome::Deleted, Some(MutationEvent::delete(id))))
                }
            })
            .await
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MutationLog impl
// ═══════════════════════════════════════════════════════════════

impl MutationLog for MemoryStore {
    fn subscribe(
        &self,
        filter: &ChangeFilter,
        resume_after: Option<&Checkpoint>,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ChangeStream>, StoreError>> + Send + '_>> {
        let filter = filter.clone();
        let resume = resume_after.map(checkpoint_position).transpose();
        Box::pin(async move {
            let resume = resume?;
            // Receiver создаётся до чтения состояния: событие, дописанное
            // между чтением и ожиданием, не потеряется.
            let rx = self.shared.notify_tx.subscribe();
            let state = self.shared.state.read().await;
            let position = match resume {
                Some(seq) => {
                    if seq >= state.next_seq {
                        return Err(StoreError::new(format!(
                            "checkpoint seq {seq} is ahead of log head {}",
                            state.next_seq - 1
                        )));
                    }
                    if seq + 1 < state.first_retained {
                        return Err(StoreError::expired(format!(
                            "checkpoint seq {seq} is older than retained log (first seq {})",
                            state.first_retained
                        )));
                    }
                    seq
                }
                None => state.first_retained - 1,
            };
            drop(state);

            Ok(Box::new(MemorySubscription {
                shared: self.shared.clone(),
                filter,
                position,
                rx,
                closed: false,
            }) as Box<dyn ChangeStream>)
        })
    }

    fn head(&self) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let state = self.shared.state.read().await;
            if state.next_seq == 1 {
                Ok(None)
            } else {
                Ok(Some(position_checkpoint(state.next_seq - 1)))
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemorySubscription
// ═══════════════════════════════════════════════════════════════

pub struct MemorySubscription {
    shared: Arc<Shared>,
    filter: ChangeFilter,
    /// seq последнего просмотренного события.
    position: u64,
    rx: broadcast::Receiver<()>,
    closed: bool,
}

impl ChangeStream for MemorySubscription {
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Option<Result<ChangeEnvelope, StoreError>>> + Send + '_>> {
        Box::pin(async move {
            loop {
                if self.closed {
                    return None;
                }
                {
                    let state = self.shared.state.read().await;
                    if self.position + 1 < state.first_retained {
                        return Some(Err(StoreError::expired(format!(
                            "subscription at seq {} fell behind log retention",
                            self.position
                        ))));
                    }
                    let skip = (self.position + 1 - state.first_retained) as usize;
                    for entry in state.log.iter().skip(skip) {
                        self.position = entry.seq;
                        if self.filter.matches(&entry.event) {
                            return Some(Ok(ChangeEnvelope {
                                checkpoint: position_checkpoint(entry.seq),
                                event: entry.event.clone(),
                            }));
                        }
                    }
                }
                match self.rx.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.closed = true;
        })
    }
}
