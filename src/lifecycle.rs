use mw_cluster::MembershipEngine;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Leaving,
    Stopped,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot shut down from state {0:?}")]
    InvalidTransition(LifecycleState),
    #[error("report server exited unexpectedly")]
    ServerStopped,
    #[error("report server failed")]
    ServerFailed(#[source] io::Error),
    #[error("report server task panicked: {0}")]
    ServerPanicked(String),
}

/// Drives a node through `Running -> Leaving -> Stopped`.
pub struct Lifecycle {
    engine: Arc<MembershipEngine>,
    state: LifecycleState,
    leave_timeout: Duration,
}

impl Lifecycle {
    pub fn new(engine: Arc<MembershipEngine>, leave_timeout: Duration) -> Self {
        Self {
            engine,
            state: LifecycleState::Running,
            leave_timeout,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Waits for `signal`, then shuts down.
    pub async fn run_until<F>(&mut self, signal: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()>,
    {
        signal.await;
        self.shutdown().await
    }

    /// Runs until `signal` fires or `server` ends, then shuts down.
    ///
    /// `stop` asks the server to drain. If the server ended first the node
    /// still leaves the cluster, and the server's fate is returned as the
    /// error.
    pub async fn supervise<F>(
        &mut self,
        mut server: JoinHandle<io::Result<()>>,
        stop: oneshot::Sender<()>,
        signal: F,
    ) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()>,
    {
        let failure = tokio::select! {
            () = signal => None,
            res = &mut server => Some(match res {
                Ok(Ok(())) => LifecycleError::ServerStopped,
                Ok(Err(e)) => LifecycleError::ServerFailed(e),
                Err(e) => LifecycleError::ServerPanicked(e.to_string()),
            }),
        };
        if let Some(e) = &failure {
            tracing::error!(error = %e, "report server is gone, shutting down");
        }

        let _ = stop.send(());
        self.shutdown().await?;
        server.abort();
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Leaves the cluster within the leave timeout and stops gossiping.
    ///
    /// A leave that times out is logged and shutdown carries on.
    pub async fn shutdown(&mut self) -> Result<(), LifecycleError> {
        if self.state != LifecycleState::Running {
            return Err(LifecycleError::InvalidTransition(self.state));
        }

        self.state = LifecycleState::Leaving;
        tracing::info!(timeout = ?self.leave_timeout, "leaving cluster");
        match self.engine.leave(self.leave_timeout).await {
            Ok(()) => tracing::info!("departure propagated"),
            Err(e) => tracing::warn!(error = %e, "graceful leave incomplete, stopping anyway"),
        }

        self.engine.shutdown();
        self.state = LifecycleState::Stopped;
        tracing::info!("node stopped");
        Ok(())
    }
}

/// Resolves on the first SIGINT, SIGTERM or SIGHUP.
pub async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let others = async {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
            (Ok(mut term), Ok(mut hup)) => {
                tokio::select! {
                    _ = term.recv() => {}
                    _ = hup.recv() => {}
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "failed to install signal handlers");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let others = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = others => tracing::info!("received termination signal"),
    }
}
