/// Текущее Unix-время в миллисекундах.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Checkpoint из монотонного u64 (seq или offset), big-endian.
///
/// Общий формат для backend'ов, у которых позиция — просто число.
/// Сравнение байт big-endian совпадает с порядком чисел.
pub fn position_checkpoint(position: u64) -> crate::Checkpoint {
    crate::Checkpoint::from_bytes(position.to_be_bytes().to_vec())
}

/// Обратное к `position_checkpoint`. Чужой формат — `ErrorKind::Format`.
pub fn checkpoint_position(checkpoint: &crate::Checkpoint) -> Result<u64, crate::StoreError> {
    let bytes: [u8; 8] = checkpoint.as_bytes().try_into().map_err(|_| {
        crate::StoreError::format_err(format!(
            "checkpoint {checkpoint} is not an 8-byte position"
        ))
    })?;
    Ok(u64::from_be_bytes(bytes))
}
