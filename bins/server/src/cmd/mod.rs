pub mod produce;
pub mod run;
pub mod sweep;
pub mod tail;

use tokio_util::sync::CancellationToken;

/// Чем закончилась команда (кроме фатальных ошибок).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// Часть работы не выполнена; процесс выходит с кодом 2.
    Partial,
}

/// Token, который отменяется по Ctrl+C.
pub(crate) fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("shutting down..."),
            Err(e) => tracing::error!(error = %e, "ctrl-c handler failed, shutting down"),
        }
        signal_token.cancel();
    });
    token
}
