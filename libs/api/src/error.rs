/// Category of a store error. Lets the tailer and the reconciler decide
/// between retry, skip and fail fast without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// I/O or network error — transient, may retry/resubscribe.
    Io,
    /// Payload does not carry the fields the reader needs.
    Format,
    /// Checkpoint is older than what the log still retains.
    Expired,
    /// Record does not exist.
    NotFound,
    /// Write contradicts current state (e.g. second completion).
    Conflict,
    /// Invalid configuration — permanent, fail at startup.
    Config,
    /// Logical error (invalid argument, invalid state, generic).
    Logic,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Format => f.write_str("format"),
            ErrorKind::Expired => f.write_str("expired"),
            ErrorKind::NotFound => f.write_str("not_found"),
            ErrorKind::Conflict => f.write_str("conflict"),
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

/// Unified error type for all capability trait methods
/// (record store, byte store, mutation log, checkpoint store).
///
/// Carries an `ErrorKind` for categorization and a human-readable message.
/// `From` impls assign the kind automatically so backends can use `?`.
#[derive(Clone)]
pub struct StoreError {
    kind: ErrorKind,
    message: String,
}

impl StoreError {
    /// Generic logic error (default kind).
    pub fn new(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Logic, message: msg.into() }
    }

    /// I/O error — transient.
    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    /// Malformed payload.
    pub fn format_err(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into() }
    }

    /// Resume position is no longer retained by the log.
    pub fn expired(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Expired, message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::NotFound, message: msg.into() }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Conflict, message: msg.into() }
    }

    /// Configuration error — permanent.
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Transient errors are worth a retry with the same input.
    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Io
    }

    /// Prepend context, keeping the kind.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        Self { kind: self.kind, message: format!("{ctx}: {}", self.message) }
    }
}

impl std::fmt::Debug for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            _ => ErrorKind::Io,
        };
        Self { kind, message: e.to_string() }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self { kind: ErrorKind::Format, message: e.to_string() }
    }
}

impl From<uuid::Error> for StoreError {
    fn from(e: uuid::Error) -> Self {
        Self { kind: ErrorKind::Format, message: e.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_not_found_kind() {
        let err: StoreError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!err.is_transient());

        let err: StoreError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.is_transient());
    }

    #[test]
    fn context_keeps_kind() {
        let err = StoreError::expired("token gone").with_context("subscribe");
        assert_eq!(err.kind(), ErrorKind::Expired);
        assert_eq!(err.to_string(), "subscribe: token gone");
        assert_eq!(format!("{err:?}"), "[expired] subscribe: token gone");
    }
}
