pub mod error;
pub mod types;
pub mod util;

use std::future::Future;
use std::pin::Pin;

pub use error::{ErrorKind, StoreError};
pub use types::{
    ChangeEnvelope, ChangeFilter, Checkpoint, DeleteOutcome, MutationEvent, OperationKind,
    Record, RecordId, STORED_AT_FIELD,
};
pub use util::now_ms;

// ════════════════════════════════════════════════════════════════
//  Capability traits
//
//  Все внешние системы (metadata store, blob area, mutation log,
//  хранилище checkpoint'а) видны ядру только через эти трейты.
//  Клиенты создаются явно и передаются в tailer/reconciler как
//  Arc<dyn ...> — никакого глобального состояния процесса.
// ════════════════════════════════════════════════════════════════

/// Одно-слотовое durable хранилище позиции возобновления.
pub trait CheckpointStore: Send + Sync {
    /// `Ok(None)` — первый запуск, слот ещё не записан. Это не ошибка.
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>, StoreError>> + Send + '_>>;

    /// Атомарно заменить значение: после crash'а `load` видит либо
    /// старое, либо новое значение целиком.
    fn save(&self, checkpoint: &Checkpoint) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;
}

/// Открытая подписка на mutation log — упорядоченный поток событий.
pub trait ChangeStream: Send {
    /// Следующее событие, прошедшее фильтр подписки.
    /// `None` = поток закрыт со стороны лога.
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Option<Result<ChangeEnvelope, StoreError>>> + Send + '_>>;

    /// Освободить ресурсы подписки. Повторный вызов — no-op.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Упорядоченный, возобновляемый лог изменений над record store.
pub trait MutationLog: Send + Sync {
    /// Открыть подписку. `resume_after = None` — с начала того, что лог
    /// ещё хранит. Если checkpoint старше хранимого окна — ошибка
    /// `ErrorKind::Expired`.
    fn subscribe(
        &self,
        filter: &ChangeFilter,
        resume_after: Option<&Checkpoint>,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ChangeStream>, StoreError>> + Send + '_>>;

    /// Позиция последнего события в логе (`None` — лог пуст).
    /// Нужна, чтобы начать "с текущего момента" без пропусков при
    /// переподписке.
    fn head(&self) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>, StoreError>> + Send + '_>>;
}

/// Metadata store. Каждая операция атомарна сама по себе;
/// транзакций над несколькими записями нет.
pub trait RecordStore: Send + Sync {
    /// Первая фаза записи. Дубликат id — `ErrorKind::Conflict`.
    fn insert(&self, record: Record) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Вторая фаза записи (используется только producer'ом).
    fn update_stored_at(
        &self,
        id: RecordId,
        stored_at_ms: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    fn get(&self, id: RecordId) -> Pin<Box<dyn Future<Output = Result<Option<Record>, StoreError>> + Send + '_>>;

    /// Неполные записи с `created_at_ms < threshold_ms`, не больше `limit`,
    /// порядок не гарантируется.
    fn find_incomplete_older_than(
        &self,
        threshold_ms: i64,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Record>, StoreError>> + Send + '_>>;

    /// Удалить по id. Отсутствующая запись — не ошибка.
    fn delete_by_id(&self, id: RecordId) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Compare-and-delete: удалить, только если `stored_at` всё ещё пуст.
    /// Поздняя запись "stored" всегда выигрывает у sweep'а.
    fn delete_if_incomplete(
        &self,
        id: RecordId,
    ) -> Pin<Box<dyn Future<Output = Result<DeleteOutcome, StoreError>> + Send + '_>>;
}

/// Blob area с ключом-директорией на запись.
pub trait ByteStore: Send + Sync {
    /// Записать байты записи целиком (заменяя прежние).
    fn write(&self, id: RecordId, bytes: Vec<u8>) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Дописать chunk, создав директорию при необходимости.
    fn append(&self, id: RecordId, chunk: Vec<u8>) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Рекурсивно удалить всё по записи. Отсутствие — не ошибка.
    fn delete_all(&self, id: RecordId) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    fn exists(&self, id: RecordId) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + '_>>;
}
