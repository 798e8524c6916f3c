use std::future::Future;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use storetail_api::util::{checkpoint_position, position_checkpoint};
use storetail_api::{
    ChangeEnvelope, ChangeFilter, ChangeStream, Checkpoint, MutationLog, StoreError,
};

use crate::config::OpLine;
use crate::fsutil::{blocking, io_err, last_line_end};

const READ_CHUNK: usize = 8 * 1024;

// ════════════════════════════════════════════════════════════════
//  FileMutationLog
// ════════════════════════════════════════════════════════════════

/// Mutation log поверх `oplog.jsonl`.
///
/// Checkpoint — байтовое смещение сразу за строкой события
/// (8 байт big-endian). Файл только дописывается, так что смещение
/// больше длины файла означает, что лог был обрезан или заменён.
#[derive(Clone)]
pub struct FileMutationLog {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileMutationLog {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self { path: path.into(), poll_interval }
    }
}

/// Проверить, что `offset` указывает на начало строки внутри файла.
fn validate_offset(path: &std::path::Path, offset: u64) -> Result<(), StoreError> {
    if offset == 0 {
        return Ok(());
    }
    let mut f = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::expired(format!(
                "checkpoint offset {offset} but {} does not exist",
                path.display()
            )));
        }
        Err(e) => return Err(io_err(format!("open {}", path.display()), e)),
    };
    let len = f.metadata().map_err(|e| io_err("stat oplog", e))?.len();
    if offset > len {
        return Err(StoreError::expired(format!(
            "checkpoint offset {offset} is past end of log ({len} bytes)"
        )));
    }
    f.seek(SeekFrom::Start(offset - 1)).map_err(|e| io_err("seek", e))?;
    let mut byte = [0u8; 1];
    f.read_exact(&mut byte).map_err(|e| io_err("read", e))?;
    if byte[0] != b'\n' {
        return Err(StoreError::format_err(format!(
            "checkpoint offset {offset} is not at a line boundary"
        )));
    }
    Ok(())
}

impl MutationLog for FileMutationLog {
    fn subscribe(
        &self,
        filter: &ChangeFilter,
        resume_after: Option<&Checkpoint>,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ChangeStream>, StoreError>> + Send + '_>> {
        let filter = filter.clone();
        let resume = resume_after.map(checkpoint_position).transpose();
        Box::pin(async move {
            let offset = resume?.unwrap_or(0);
            let path = self.path.clone();
            blocking(move || validate_offset(&path, offset)).await?;

            Ok(Box::new(FileChangeStream {
                path: self.path.clone(),
                poll_interval: self.poll_interval,
                filter,
                file: None,
                pending: Vec::new(),
                offset,
                closed: false,
            }) as Box<dyn ChangeStream>)
        })
    }

    fn head(&self) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>, StoreError>> + Send + '_>> {
        let path = self.path.clone();
        Box::pin(blocking(move || {
            let mut f = match std::fs::File::open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(io_err(format!("open {}", path.display()), e)),
            };
            match last_line_end(&mut f)? {
                0 => Ok(None),
                end => Ok(Some(position_checkpoint(end))),
            }
        }))
    }
}

// ════════════════════════════════════════════════════════════════
//  FileChangeStream
// ════════════════════════════════════════════════════════════════

/// Подписка: читает oplog с `offset`, на конце файла ждёт
/// `poll_interval` и перечитывает.
pub struct FileChangeStream {
    path: PathBuf,
    poll_interval: Duration,
    filter: ChangeFilter,
    file: Option<tokio::fs::File>,
    /// Прочитанные, но ещё не разобранные байты (начинаются с `offset`).
    pending: Vec<u8>,
    /// Смещение сразу за последней разобранной строкой.
    offset: u64,
    closed: bool,
}

impl FileChangeStream {
    /// Следующая полная строка из буфера; `offset` сдвигается за неё.
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let nl = self.pending.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=nl).collect();
        self.offset += line.len() as u64;
        Some(line)
    }

    /// Дочитать из файла. `Ok(false)` — новых байт нет.
    async fn fill(&mut self) -> Result<bool, StoreError> {
        if self.file.is_none() {
            match tokio::fs::File::open(&self.path).await {
                Ok(mut f) => {
                    f.seek(SeekFrom::Start(self.offset))
                        .await
                        .map_err(|e| io_err("seek oplog", e))?;
                    self.file = Some(f);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
                Err(e) => return Err(io_err(format!("open {}", self.path.display()), e)),
            }
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(false);
        };

        let mut chunk = vec![0u8; READ_CHUNK];
        let n = file.read(&mut chunk).await.map_err(|e| io_err("read oplog", e))?;
        if n > 0 {
            self.pending.extend_from_slice(&chunk[..n]);
            return Ok(true);
        }

        let read_pos = self.offset + self.pending.len() as u64;
        let len = file.metadata().await.map_err(|e| io_err("stat oplog", e))?.len();
        if len < read_pos {
            return Err(StoreError::expired(format!(
                "oplog shrank to {len} bytes below read position {read_pos}"
            )));
        }
        Ok(false)
    }
}

impl ChangeStream for FileChangeStream {
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Option<Result<ChangeEnvelope, StoreError>>> + Send + '_>> {
        Box::pin(async move {
            loop {
                if self.closed {
                    return None;
                }
                while let Some(line) = self.take_line() {
                    let text = String::from_utf8_lossy(&line);
                    let text = text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    let op: OpLine = match serde_json::from_str(text) {
                        Ok(op) => op,
                        Err(e) => {
                            return Some(Err(StoreError::format_err(format!(
                                "oplog line ending at {}: {e}",
                                self.offset
                            ))));
                        }
                    };
                    let event = op.into_event();
                    if self.filter.matches(&event) {
                        return Some(Ok(ChangeEnvelope {
                            checkpoint: position_checkpoint(self.offset),
                            event,
                        }));
                    }
                }
                match self.fill().await {
                    Ok(true) => {}
                    Ok(false) => tokio::time::sleep(self.poll_interval).await,
                    Err(e) => return Some(Err(e)),
                }
            }
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.closed = true;
            self.file = None;
            self.pending.clear();
        })
    }
}
