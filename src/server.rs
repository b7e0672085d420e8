//! Serving the API for the lifetime of the process.
//!
//! Shutdown is bounded: once asked to stop, the listener closes, open
//! connections get a fixed drain period, and the scheduler's final flush
//! runs whether or not they finished in time.

use crate::api;
use crate::error::{Result, StoreError};
use crate::scheduler::Scheduler;
use crate::store::Store;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinError;
use tracing::{error, info, warn};

/// Serve the API on `listener` until `shutdown` resolves, then stop
/// `scheduler` with its final flush.
///
/// A server error also ends serving; the final flush still runs and the
/// error is returned afterwards.
pub async fn serve<F>(
    listener: TcpListener,
    store: Arc<Store>,
    mut scheduler: Scheduler,
    shutdown: F,
    drain_timeout: Duration,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, api::router(store)).with_graceful_shutdown(async move {
        let _ = stop_rx.await;
    });
    let mut server = tokio::spawn(async move { server.await });

    let early_exit = tokio::select! {
        joined = &mut server => Some(joined),
        _ = shutdown => None,
    };

    let served = match early_exit {
        Some(joined) => {
            error!("server stopped before shutdown was requested");
            flatten(joined)
        }
        None => {
            info!(
                drain_ms = drain_timeout.as_millis() as u64,
                "shutdown requested, draining connections"
            );
            let _ = stop_tx.send(());
            match tokio::time::timeout(drain_timeout, &mut server).await {
                Ok(joined) => flatten(joined),
                Err(_) => {
                    warn!("connections still open after drain timeout, dropping them");
                    server.abort();
                    Ok(())
                }
            }
        }
    };

    let policy = scheduler.policy();
    // The scheduler logs a failed final flush itself; the process exits anyway.
    if let Err(e) = tokio::task::spawn_blocking(move || scheduler.shutdown()).await {
        error!(error = %e, "final flush task failed");
    }
    info!(policy = %policy, "shutdown complete");

    served
}

fn flatten(joined: std::result::Result<io::Result<()>, JoinError>) -> Result<()> {
    match joined {
        Ok(result) => Ok(result?),
        Err(e) => Err(StoreError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("server task failed: {}", e),
        ))),
    }
}
