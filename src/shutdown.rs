//! Signal handling and interruptible waits.
//!
//! The first SIGINT / SIGTERM / SIGHUP cancels the shared
//! [`CancellationToken`]: no new file or part transfer starts, in-flight ones
//! finish or abort without committing, and the pass returns its summary. A
//! second signal exits immediately with status 130.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Exit status for a forced shutdown (128 + SIGINT).
pub(crate) const FORCED_EXIT_CODE: i32 = 130;

/// Install signal handlers that cancel `token`.
pub(crate) fn install_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut extra = unix_signals();

        let mut received = 0u32;
        loop {
            #[cfg(unix)]
            {
                match extra.as_mut() {
                    Some((term, hup)) => {
                        tokio::select! {
                            _ = tokio::signal::ctrl_c() => {}
                            _ = term.recv() => {}
                            _ = hup.recv() => {}
                        }
                    }
                    None => {
                        if tokio::signal::ctrl_c().await.is_err() {
                            return;
                        }
                    }
                }
            }

            #[cfg(not(unix))]
            {
                if tokio::signal::ctrl_c().await.is_err() {
                    tracing::warn!("Could not listen for Ctrl+C; shutdown signals are ignored");
                    return;
                }
            }

            received += 1;
            if received == 1 {
                tracing::info!("Shutdown requested, finishing in-flight transfers...");
                tracing::info!("Press Ctrl+C again to force exit");
                token.cancel();
            } else {
                tracing::warn!("Force exit requested");
                std::process::exit(FORCED_EXIT_CODE);
            }
        }
    });
}

#[cfg(unix)]
fn unix_signals() -> Option<(tokio::signal::unix::Signal, tokio::signal::unix::Signal)> {
    use tokio::signal::unix::{signal, SignalKind};
    match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
        (Ok(term), Ok(hup)) => Some((term, hup)),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGTERM/SIGHUP; only Ctrl+C stops the run"
            );
            None
        }
    }
}

/// Sleep for `duration` unless cancelled first. Returns `false` on cancel.
pub(crate) async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = token.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn install_leaves_token_live() {
        let token = CancellationToken::new();
        install_signal_handler(token.clone());
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn sleep_completes_without_cancel() {
        let token = CancellationToken::new();
        assert!(sleep_or_cancel(Duration::from_millis(5), &token).await);
    }

    #[tokio::test]
    async fn sleep_returns_early_on_cancel() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });
        let start = std::time::Instant::now();
        assert!(!sleep_or_cancel(Duration::from_secs(30), &token).await);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
