use std::time::Duration;

use crate::TailerError;

fn default_retry_initial_ms() -> u64 {
    500
}
fn default_retry_max_ms() -> u64 {
    30_000
}

/// С какой позиции начинать, если checkpoint ещё не сохранён.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    /// Только мутации, случившиеся после старта.
    #[default]
    Latest,
    /// Всё, что лог ещё хранит. Для отладки и backfill'а.
    Earliest,
}

/// Секция `[tailer]`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct TailerConfig {
    #[serde(default)]
    pub start: StartPolicy,
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    /// Лимит подряд идущих неудачных переподписок. `None` — без лимита.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            start: StartPolicy::default(),
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
            max_retries: None,
        }
    }
}

impl TailerConfig {
    pub fn validate(&self) -> Result<(), TailerError> {
        if self.retry_initial_ms == 0 {
            return Err(TailerError::Config("retry_initial_ms must be > 0".into()));
        }
        if self.retry_max_ms < self.retry_initial_ms {
            return Err(TailerError::Config(format!(
                "retry_max_ms ({}) must be >= retry_initial_ms ({})",
                self.retry_max_ms, self.retry_initial_ms
            )));
        }
        Ok(())
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.retry_initial_ms),
            Duration::from_millis(self.retry_max_ms),
        )
    }
}

// ═══════════════════════════════════════════════════════════════
//  Backoff
// ═══════════════════════════════════════════════════════════════

/// Экспоненциальная задержка между переподписками: initial, 2x, 4x ... max.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max, current: initial }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
