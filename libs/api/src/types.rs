use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::StoreError;

/// Имя поля, которое второй фазой записи помечает запись как сохранённую.
pub const STORED_AT_FIELD: &str = "stored_at";

// ════════════════════════════════════════════════════════════════
//  RecordId
// ════════════════════════════════════════════════════════════════

/// Глобально уникальный идентификатор записи. Назначается при создании
/// и больше не меняется; им же именуется директория с байтами записи.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Новый случайный (v4) идентификатор.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl std::str::FromStr for RecordId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ════════════════════════════════════════════════════════════════
//  Record
// ════════════════════════════════════════════════════════════════

/// Метаданные одной единицы хранения.
///
/// `stored_at_ms` выставляется ровно один раз, после того как байты
/// записаны. Пока его нет — запись неполная.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    /// Unix ms.
    pub created_at_ms: i64,
    /// Unix ms, `None` = запись ещё не завершена.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_at_ms: Option<i64>,
}

impl Record {
    pub fn new(id: RecordId, created_at_ms: i64) -> Self {
        Self { id, created_at_ms, stored_at_ms: None }
    }

    pub fn is_complete(&self) -> bool {
        self.stored_at_ms.is_some()
    }

    /// Неполная запись, созданная строго раньше `threshold_ms`.
    pub fn is_incomplete_before(&self, threshold_ms: i64) -> bool {
        !self.is_complete() && self.created_at_ms < threshold_ms
    }

    /// Проверка перехода в состояние "stored": только один раз и
    /// не раньше момента создания.
    pub fn check_completion(&self, stored_at_ms: i64) -> Result<(), StoreError> {
        if let Some(prev) = self.stored_at_ms {
            return Err(StoreError::conflict(format!(
                "record {} already stored at {prev}",
                self.id
            )));
        }
        if stored_at_ms < self.created_at_ms {
            return Err(StoreError::new(format!(
                "record {}: stored_at {stored_at_ms} precedes created_at {}",
                self.id, self.created_at_ms
            )));
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════
//  Checkpoint
// ════════════════════════════════════════════════════════════════

/// Непрозрачная позиция в mutation log.
///
/// Байты выдаёт и интерпретирует только backend лога, который её
/// выпустил. Tailer и checkpoint store хранят её как есть.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Checkpoint(Vec<u8>);

impl Checkpoint {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&base64::engine::general_purpose::STANDARD_NO_PAD.encode(&self.0))
    }
}

impl std::fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Checkpoint({self})")
    }
}

// ════════════════════════════════════════════════════════════════
//  Mutation events
// ════════════════════════════════════════════════════════════════

/// Тип операции в mutation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Insert => f.write_str("insert"),
            OperationKind::Update => f.write_str("update"),
            OperationKind::Delete => f.write_str("delete"),
        }
    }
}

/// Изменение одной записи: тип операции, id и набор изменённых полей.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub kind: OperationKind,
    pub record_id: RecordId,
    #[serde(default)]
    pub updated_fields: Vec<String>,
}

impl MutationEvent {
    pub fn insert(record_id: RecordId) -> Self {
        Self {
            kind: OperationKind::Insert,
            record_id,
            updated_fields: vec!["id".into(), "created_at".into()],
        }
    }

    pub fn update(record_id: RecordId, fields: &[&str]) -> Self {
        Self {
            kind: OperationKind::Update,
            record_id,
            updated_fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn stored(record_id: RecordId) -> Self {
        Self::update(record_id, &[STORED_AT_FIELD])
    }

    pub fn delete(record_id: RecordId) -> Self {
        Self { kind: OperationKind::Delete, record_id, updated_fields: Vec::new() }
    }

    pub fn touches(&self, field: &str) -> bool {
        self.updated_fields.iter().any(|f| f == field)
    }
}

/// Событие из подписки вместе с позицией, с которой можно продолжить
/// сразу после него.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEnvelope {
    pub checkpoint: Checkpoint,
    pub event: MutationEvent,
}

// ════════════════════════════════════════════════════════════════
//  ChangeFilter
// ════════════════════════════════════════════════════════════════

/// Предикат подписки. Backend применяет его на своей стороне, если
/// умеет; потребитель всё равно перепроверяет `matches`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub kind: OperationKind,
    pub required_field: Option<String>,
}

impl ChangeFilter {
    /// `kind = update` и среди изменённых полей есть `stored_at`.
    pub fn stored() -> Self {
        Self {
            kind: OperationKind::Update,
            required_field: Some(STORED_AT_FIELD.to_string()),
        }
    }

    pub fn matches(&self, event: &MutationEvent) -> bool {
        if event.kind != self.kind {
            return false;
        }
        match &self.required_field {
            Some(field) => event.touches(field),
            None => true,
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  DeleteOutcome
// ════════════════════════════════════════════════════════════════

/// Результат compare-and-delete по id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Запись была неполной и удалена.
    Deleted,
    /// Записи уже нет.
    Absent,
    /// Запись успела завершиться — не удалена.
    Completed,
}
