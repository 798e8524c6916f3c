use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use storetail_api::StoreError;

/// I/O ошибка с контекстом; `NotFound` остаётся `NotFound`.
pub(crate) fn io_err(ctx: impl std::fmt::Display, e: std::io::Error) -> StoreError {
    StoreError::from(e).with_context(ctx)
}

/// Выполнить блокирующую файловую операцию вне async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::io(format!("blocking task: {e}")))?
}

/// `{path}.tmp` рядом с целевым файлом (тот же каталог → rename атомарен).
pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Записать файл целиком: tmp → fsync → rename → fsync каталога.
/// Читатель видит либо старое содержимое, либо новое, но не обрывок.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::config(format!("{} has no parent directory", path.display())))?;
    std::fs::create_dir_all(parent).map_err(|e| io_err(format!("mkdir {}", parent.display()), e))?;

    let tmp = tmp_path(path);
    {
        let mut f = File::create(&tmp).map_err(|e| io_err(format!("create {}", tmp.display()), e))?;
        f.write_all(bytes).map_err(|e| io_err(format!("write {}", tmp.display()), e))?;
        f.sync_all().map_err(|e| io_err(format!("fsync {}", tmp.display()), e))?;
    }
    std::fs::rename(&tmp, path)
        .map_err(|e| io_err(format!("rename {} -> {}", tmp.display(), path.display()), e))?;
    sync_dir(parent)
}

/// Fsync каталога, чтобы запись о rename пережила crash.
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<(), StoreError> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| io_err(format!("fsync dir {}", dir.display()), e))
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<(), StoreError> {
    Ok(())
}

/// Эксклюзивный advisory lock (flock) на файл; снимается при drop.
/// Блокирует и другие процессы, и другие открытия файла в этом же.
pub(crate) struct FileLock(File);

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.0);
    }
}

/// Дождаться эксклюзивного lock'а на `path`, создав файл при нужде.
pub(crate) fn lock_exclusive(path: &Path) -> Result<FileLock, StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(format!("mkdir {}", parent.display()), e))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| io_err(format!("open {}", path.display()), e))?;
    fs2::FileExt::lock_exclusive(&file).map_err(|e| io_err(format!("lock {}", path.display()), e))?;
    Ok(FileLock(file))
}

/// Смещение сразу за последним `\n` в файле (0, если строк нет).
/// Хвост без перевода строки — недописанная строка, её не считаем.
pub(crate) fn last_line_end(f: &mut File) -> Result<u64, StoreError> {
    let len = f.seek(SeekFrom::End(0)).map_err(|e| io_err("seek", e))?;
    let mut pos = len;
    let mut buf = [0u8; 1];
    while pos > 0 {
        f.seek(SeekFrom::Start(pos - 1)).map_err(|e| io_err("seek", e))?;
        f.read_exact(&mut buf).map_err(|e| io_err("read", e))?;
        if buf[0] == b'\n' {
            return Ok(pos);
        }
        pos -= 1;
    }
    Ok(0)
}
