//! Shutdown signal wiring.
//!
//! The first SIGINT or SIGTERM cancels the returned token: the running cycle
//! stops starting new work, lets in-flight calls finish and saves state. A
//! second signal exits immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Exit code used when a second signal forces the process down.
const FORCED_EXIT_CODE: i32 = 130;

/// Spawns the signal listener and returns the token it cancels.
pub(crate) fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let count = Arc::new(AtomicU32::new(0));

    let handler_token = token.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut sigterm = {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(stream) => Some(stream),
                Err(error) => {
                    warn!(%error, "failed to register SIGTERM handler, only Ctrl+C will stop the loop");
                    None
                }
            }
        };

        loop {
            #[cfg(unix)]
            {
                let terminate = async {
                    match sigterm.as_mut() {
                        Some(stream) => {
                            stream.recv().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(error) = result {
                            warn!(%error, "failed to listen for Ctrl+C");
                            return;
                        }
                    }
                    () = terminate => {}
                }
            }

            #[cfg(not(unix))]
            {
                if let Err(error) = tokio::signal::ctrl_c().await {
                    warn!(%error, "failed to listen for Ctrl+C");
                    return;
                }
            }

            if count.fetch_add(1, Ordering::SeqCst) == 0 {
                info!("shutdown signal received, finishing in-flight work and saving state");
                info!("send the signal again to force exit");
                handler_token.cancel();
            } else {
                warn!("forced exit requested");
                std::process::exit(FORCED_EXIT_CODE);
            }
        }
    });

    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn install_returns_live_token() {
        let token = install_signal_handler();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn child_tokens_observe_parent_cancel() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
