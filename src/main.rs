//! userdb entry point.
//!
//! Loads the data file, starts the flush scheduler and serves the HTTP API
//! until asked to stop. SIGHUP requests an immediate flush; SIGINT, SIGTERM
//! and SIGQUIT shut down gracefully with a final flush.

use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use userdb::{server, Args, Config, Scheduler, SchedulerHandle, Store};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run(Args::parse()).await {
        error!(error = %e, "userdb failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> userdb::Result<()> {
    let config = Config::try_from(args)?;
    let file = config.data_file();

    let store = Arc::new(Store::open(&file)?);
    info!(users = store.count(), counter = store.counter(), "store ready");

    let scheduler = Scheduler::start(Arc::clone(&store), file, config.flush)?;
    tokio::spawn(flush_on_hangup(scheduler.handle()));

    let listener = TcpListener::bind(&config.host).await?;
    info!(addr = %listener.local_addr()?, "listening");

    server::serve(listener, store, scheduler, shutdown_signal(), config.drain_timeout).await
}

#[cfg(unix)]
async fn flush_on_hangup(handle: SchedulerHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGHUP, flush-on-signal disabled");
            return;
        }
    };

    while hangup.recv().await.is_some() {
        info!("SIGHUP received, requesting flush");
        if handle.trigger().is_err() {
            break;
        }
    }
}

#[cfg(not(unix))]
async fn flush_on_hangup(_handle: SchedulerHandle) {}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::quit())) {
            (Ok(mut term), Ok(mut quit)) => {
                tokio::select! {
                    _ = term.recv() => {},
                    _ = quit.recv() => {},
                }
            }
            _ => {
                warn!("cannot listen for SIGTERM/SIGQUIT");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("interrupt received"),
        _ = terminate => info!("termination requested"),
    }
}
