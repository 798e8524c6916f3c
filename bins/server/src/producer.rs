use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use storetail_api::{now_ms, ByteStore, Record, RecordId, RecordStore, StoreError};

use crate::faults::{FaultInjector, FaultPoint, FaultProbabilities, NoFaults, RandomFaults, Rng};

const TEXT_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 ";

// ═══════════════════════════════════════════════════════════════
//  Config
// ═══════════════════════════════════════════════════════════════

fn default_min_delay_ms() -> u64 {
    2000
}
fn default_max_delay_ms() -> u64 {
    5000
}
fn default_min_chunks() -> u64 {
    2
}
fn default_max_chunks() -> u64 {
    5
}
fn default_min_chunk_bytes() -> u64 {
    512
}
fn default_max_chunk_bytes() -> u64 {
    1536
}
fn default_true() -> bool {
    true
}

/// Секция `[producer]`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProducerConfig {
    /// Пауза между записями: равномерно в `[min_delay_ms, max_delay_ms)`.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Число chunk'ов, включительно.
    #[serde(default = "default_min_chunks")]
    pub min_chunks: u64,
    #[serde(default = "default_max_chunks")]
    pub max_chunks: u64,
    /// Размер chunk'а: `[min_chunk_bytes, max_chunk_bytes)`.
    #[serde(default = "default_min_chunk_bytes")]
    pub min_chunk_bytes: u64,
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: u64,
    /// 0 — seed от часов.
    #[serde(default)]
    pub seed: i64,
    #[serde(default = "default_true")]
    pub faults_enabled: bool,
    #[serde(default)]
    pub faults: FaultProbabilities,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            min_chunks: default_min_chunks(),
            max_chunks: default_max_chunks(),
            min_chunk_bytes: default_min_chunk_bytes(),
            max_chunk_bytes: default_max_chunk_bytes(),
            seed: 0,
            faults_enabled: true,
            faults: FaultProbabilities::default(),
        }
    }
}

impl ProducerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_delay_ms < self.min_delay_ms {
            return Err("max_delay_ms must be >= min_delay_ms".into());
        }
        if self.min_chunks == 0 || self.max_chunks < self.min_chunks {
            return Err("chunks range must be non-empty and start at 1 or more".into());
        }
        if self.min_chunk_bytes == 0 || self.max_chunk_bytes < self.min_chunk_bytes {
            return Err("chunk size range must be non-empty and start at 1 or more".into());
        }
        self.faults.validate()
    }

    pub fn injector(&self) -> Box<dyn FaultInjector> {
        if self.faults_enabled {
            Box::new(RandomFaults::new(self.faults.clone(), fault_seed(self.seed)))
        } else {
            Box::new(NoFaults)
        }
    }
}

/// Seed отдельного потока случайности для отказов, чтобы размеры
/// не зависели от них. Для ненулевого seed результат тоже ненулевой
/// (нечётный), иначе `Rng` взял бы seed от часов.
fn fault_seed(seed: i64) -> i64 {
    if seed == 0 {
        return 0;
    }
    seed.wrapping_mul(0x2545_f491_4f6c_dd1d) | 1
}

// ═══════════════════════════════════════════════════════════════
//  Producer
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Clone, Copy)]
pub struct ProducerStats {
    pub attempted: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Двухфазная запись: метаданные, байты по chunk'ам, отметка
/// `stored_at`. Любой отказ посередине оставляет неполную запись,
/// которую потом подберёт reconciler.
pub struct Producer {
    records: Arc<dyn RecordStore>,
    bytes: Arc<dyn ByteStore>,
    faults: Box<dyn FaultInjector>,
    rng: Rng,
    config: ProducerConfig,
}

impl Producer {
    pub fn new(records: Arc<dyn RecordStore>, bytes: Arc<dyn ByteStore>, config: ProducerConfig) -> Self {
        let faults = config.injector();
        Self::with_injector(records, bytes, config, faults)
    }

    pub fn with_injector(
        records: Arc<dyn RecordStore>,
        bytes: Arc<dyn ByteStore>,
        config: ProducerConfig,
        faults: Box<dyn FaultInjector>,
    ) -> Self {
        Self { records, bytes, faults, rng: Rng::new(config.seed), config }
    }

    fn inject(&mut self, id: RecordId, point: FaultPoint) -> Result<(), StoreError> {
        if self.faults.should_fail(point) {
            return Err(StoreError::io(format!("injected fault at {point} for record {id}")));
        }
        Ok(())
    }

    fn random_text(&mut self, len: u64) -> Vec<u8> {
        (0..len)
            .map(|_| TEXT_ALPHABET[self.rng.range(0, TEXT_ALPHABET.len() as u64) as usize])
            .collect()
    }

    fn next_delay(&mut self) -> Duration {
        Duration::from_millis(self.rng.range(self.config.min_delay_ms, self.config.max_delay_ms))
    }

    /// Одна запись от начала до конца. Возвращает id полной записи.
    pub async fn produce_one(&mut self) -> Result<RecordId, StoreError> {
        let id = RecordId::generate();

        self.inject(id, FaultPoint::CreateRecord)?;
        self.records.insert(Record::new(id, now_ms())).await?;

        self.inject(id, FaultPoint::CreateFolder)?;
        self.inject(id, FaultPoint::CreateFile)?;

        let chunks = self.rng.range(self.config.min_chunks, self.config.max_chunks + 1);
        let mut size = 0u64;
        for _ in 0..chunks {
            self.inject(id, FaultPoint::StreamAborted)?;
            let len = self.rng.range(self.config.min_chunk_bytes, self.config.max_chunk_bytes);
            self.inject(id, FaultPoint::WriteChunk)?;
            let chunk = self.random_text(len);
            self.bytes.append(id, chunk).await?;
            size += len;
        }
        self.inject(id, FaultPoint::CloseFile)?;

        self.inject(id, FaultPoint::MarkStored)?;
        self.records.update_stored_at(id, now_ms()).await?;

        tracing::info!(record_id = %id, chunks, size, "record stored");
        Ok(id)
    }

    /// Писать записи с паузой, пока не отменят или не наберётся `limit`.
    pub async fn run(&mut self, token: CancellationToken, limit: Option<u64>) -> ProducerStats {
        let mut stats = ProducerStats::default();
        tracing::info!(limit = ?limit, faults = self.config.faults_enabled, "producer started");
        loop {
            if limit.is_some_and(|n| stats.attempted >= n) {
                break;
            }
            let delay = self.next_delay();
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            stats.attempted += 1;
            match self.produce_one().await {
                Ok(_) => stats.completed += 1,
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(error = %e, "failed to store record");
                }
            }
        }
        tracing::info!(
            attempted = stats.attempted,
            completed = stats.completed,
            failed = stats.failed,
            "producer stopped"
        );
        stats
    }
}
