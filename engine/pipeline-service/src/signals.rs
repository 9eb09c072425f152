//! Signal handling for graceful shutdown

use anyhow::Result;
use tokio::sync::oneshot;
use tracing::{error, info};

/// Setup signal handlers for graceful shutdown
///
/// Returns a receiver that fires once when SIGINT or SIGTERM arrives.
pub fn setup_signal_handlers() -> Result<oneshot::Receiver<()>> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    #[cfg(unix)]
    let sigterm_flag = {
        use signal_hook::consts::SIGTERM;
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;

        let flag = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(SIGTERM, flag.clone())?;
        flag
    };

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                result = &mut ctrl_c => {
                    match result {
                        Ok(()) => info!("Ctrl+C signal received"),
                        Err(e) => error!("Failed to listen for Ctrl+C signal: {}", e),
                    }
                    break;
                }
                // Poll the SIGTERM flag registered above.
                _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {
                    #[cfg(unix)]
                    if sigterm_flag.load(std::sync::atomic::Ordering::Relaxed) {
                        info!("SIGTERM signal received");
                        break;
                    }
                }
            }
        }

        let _ = shutdown_tx.send(());
    });

    Ok(shutdown_rx)
}
