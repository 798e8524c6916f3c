use storage_file::FileBackend;

use super::{shutdown_token, Outcome};
use crate::config::{ProduceArgs, ServerConfig};
use crate::error::ServerError;
use crate::producer::Producer;

pub async fn run(config_path: &str, args: ProduceArgs) -> Result<Outcome, ServerError> {
    let mut config = ServerConfig::load(config_path)?;
    if let Some(seed) = args.seed {
        config.producer.seed = seed;
    }
    if args.no_faults {
        config.producer.faults_enabled = false;
    }
    let backend = FileBackend::open(&config.storage)?;

    let mut producer = Producer::new(backend.records.clone(), backend.bytes.clone(), config.producer);
    producer.run(shutdown_token(), args.count).await;
    Ok(Outcome::Done)
}
