use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use storage_file::FileBackendConfig;
use storetail_reconciler::ReconcilerConfig;
use storetail_tailer::TailerConfig;

use crate::error::ServerError;
use crate::producer::ProducerConfig;

#[derive(Parser)]
#[command(name = "storetail", about = "Наблюдение за завершением записей и очистка сирот")]
pub struct Cli {
    /// Путь к TOML конфиг файлу (отсутствует — значения по умолчанию)
    #[arg(long, global = true, default_value = "storetail.toml", env = "STORETAIL_CONFIG")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Следить за завершёнными записями до Ctrl+C
    Tail(TailArgs),
    /// Удалить записи, не завершённые за окно удержания
    Sweep(SweepArgs),
    /// Писать записи двухфазно, с отказами
    Produce(ProduceArgs),
    /// Producer, tailer и периодический reconciler в одном процессе
    Run,
}

#[derive(Args, Clone, Debug)]
pub struct TailArgs {
    /// Без сохранённого checkpoint'а начать с самого старого события
    #[arg(long)]
    pub earliest: bool,
}

#[derive(Args, Clone, Debug)]
pub struct SweepArgs {
    /// Один проход, даже если задан reconciler.interval_secs
    #[arg(long)]
    pub once: bool,
    /// Переопределить reconciler.retention_secs
    #[arg(long)]
    pub retention_secs: Option<u64>,
}

#[derive(Args, Clone, Debug)]
pub struct ProduceArgs {
    /// Остановиться после N записей
    #[arg(long)]
    pub count: Option<u64>,
    /// Переопределить producer.seed
    #[arg(long)]
    pub seed: Option<i64>,
    /// Отключить инъекцию отказов
    #[arg(long)]
    pub no_faults: bool,
}

// ---- TOML Config ----

#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// `data_dir`, `poll_interval_ms`.
    #[serde(flatten)]
    pub storage: FileBackendConfig,
    #[serde(default)]
    pub tailer: TailerConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub producer: ProducerConfig,
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(config = %path, "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ServerError::Config { context: "read", detail: format!("'{path}': {e}") });
            }
        };
        let config = Self::parse(&content)
            .map_err(|detail| ServerError::Config { context: "parse", detail: format!("'{path}': {detail}") })?;
        tracing::info!(config = %path, data_dir = %config.storage.data_dir, "loaded config");
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self, String> {
        let config: Self = toml::from_str(content).map_err(|e| e.to_string())?;
        config.tailer.validate().map_err(|e| e.to_string())?;
        config.reconciler.validate().map_err(|e| e.to_string())?;
        config.producer.validate()?;
        Ok(config)
    }
}
