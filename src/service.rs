//! Collector service lifecycle.
//!
//! `Created → Migrating → Serving → Draining → Stopped`, one way only.
//! The accept loop runs on a background task; the caller supplies the
//! shutdown future (normally [`shutdown_signal`]) and gets back whether
//! in-flight requests finished inside the drain window.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use strum_macros::Display;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::server::{AppState, create_router};
use crate::storage::{LogStore, StorageError};

/// Hard ceiling on waiting for in-flight requests after shutdown starts.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Pause after a failed accept (fd exhaustion and the like).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server process phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Created,
    Migrating,
    Serving,
    Draining,
    Stopped,
}

impl Phase {
    /// Whether `self → next` is the single allowed step.
    pub fn can_transition_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Created, Phase::Migrating)
                | (Phase::Migrating, Phase::Serving)
                | (Phase::Serving, Phase::Draining)
                | (Phase::Draining, Phase::Stopped)
        )
    }
}

/// How the drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DrainOutcome {
    /// Every in-flight request finished inside the window.
    Drained,
    /// The window elapsed and the remaining connections were aborted.
    Abandoned,
}

/// Service lifecycle errors. All of them are fatal to the process.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// The heartbeat collector: one store, one listener, one lifecycle.
pub struct CollectorService {
    store: Arc<dyn LogStore>,
    phase: watch::Sender<Phase>,
    drain_timeout: Duration,
}

impl std::fmt::Debug for CollectorService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorService")
            .field("backend", &self.store.backend())
            .field("phase", &self.phase())
            .field("drain_timeout", &self.drain_timeout)
            .finish()
    }
}

impl CollectorService {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        let (phase, _) = watch::channel(Phase::Created);
        Self {
            store,
            phase,
            drain_timeout: DRAIN_TIMEOUT,
        }
    }

    /// Override the drain window (tests use a short one).
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Watch phase changes.
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    fn transition(&self, next: Phase) -> Result<(), ServiceError> {
        let mut rejected = None;
        self.phase.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                rejected = Some(*current);
                false
            }
        });

        match rejected {
            Some(from) => Err(ServiceError::InvalidTransition { from, to: next }),
            None => {
                tracing::debug!(phase = %next, "Collector phase changed");
                Ok(())
            }
        }
    }

    /// Create or upgrade the schema. Blocks serving until it completes.
    pub async fn migrate(&self) -> Result<(), ServiceError> {
        self.transition(Phase::Migrating)?;
        tracing::info!(backend = self.store.backend(), "Migrating heartbeat schema");
        self.store.migrate().await?;
        Ok(())
    }

    /// Serve on `listener` until `shutdown` resolves, then drain.
    ///
    /// New connections stop being accepted as soon as draining starts.
    /// In-flight requests get `drain_timeout` to finish; after that every
    /// connection task is aborted, which closes its socket and drops its
    /// store call. The store itself is left open for the caller.
    pub async fn serve<F>(
        &self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<DrainOutcome, ServiceError>
    where
        F: Future<Output = ()> + Send,
    {
        self.transition(Phase::Serving)?;

        let addr = listener.local_addr()?;
        let app = create_router(AppState {
            store: self.store.clone(),
        });
        let (drain_tx, drain_rx) = watch::channel(());

        let mut server = tokio::spawn(accept_loop(listener, app, drain_rx));
        tracing::info!(%addr, "Collector listening");

        tokio::select! {
            () = shutdown => {}
            joined = &mut server => {
                // The accept loop only ends on its own if it panicked.
                self.transition(Phase::Draining)?;
                self.transition(Phase::Stopped)?;
                joined?;
                return Ok(DrainOutcome::Drained);
            }
        }

        self.transition(Phase::Draining)?;
        tracing::info!(timeout = ?self.drain_timeout, "Draining in-flight requests");
        let _ = drain_tx.send(());

        let outcome = match tokio::time::timeout(self.drain_timeout, &mut server).await {
            Ok(joined) => {
                joined?;
                DrainOutcome::Drained
            }
            Err(_) => {
                tracing::warn!(
                    timeout = ?self.drain_timeout,
                    "Drain timed out, abandoning in-flight requests"
                );
                // Dropping the loop's JoinSet aborts every connection task.
                server.abort();
                let _ = server.await;
                DrainOutcome::Abandoned
            }
        };

        self.transition(Phase::Stopped)?;
        tracing::info!(%outcome, "Collector stopped");
        Ok(outcome)
    }
}

/// Accept until `drain` fires, then wait for every open connection.
///
/// Connection tasks live in a `JoinSet` owned by this future, so aborting
/// the task running it tears the connections down too.
async fn accept_loop(listener: TcpListener, app: Router, mut drain: watch::Receiver<()>) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = drain.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(serve_connection(stream, peer, app.clone(), drain.clone()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    tracing::debug!(open = connections.len(), "Listener closed");
    while connections.join_next().await.is_some() {}
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    app: Router,
    mut drain: watch::Receiver<()>,
) {
    let conn = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), TowerToHyperService::new(app));
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                tracing::debug!(%peer, error = %e, "Connection ended with error");
            }
            return;
        }
        _ = drain.changed() => {}
    }

    // Finish the request in progress, then close instead of keeping alive.
    conn.as_mut().graceful_shutdown();
    if let Err(e) = conn.await {
        tracing::debug!(%peer, error = %e, "Connection ended with error while draining");
    }
}

/// Resolve on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
