//! The background processing server.
//!
//! Hosts a set of background processes under a single supervisor task and
//! coordinates a three-stage cooperative shutdown: `stopping` asks
//! processes to finish their current work, `stopped` escalates the
//! cancellation after `stop_timeout`, and `shutdown` marks the point where
//! the server abandons waiting after `shutdown_timeout`.

use super::dispatcher::Dispatcher;
use super::execution::run_with_restarts;
use super::infinite_loop::InfiniteLoopProcess;
use super::process::{ProcessContext, ProcessHandle};
use super::retry::{AutomaticRetryProcess, RetryPolicy};
use crate::config::ServerSettings;
use crate::error::ServerError;
use crate::storage::{JobStorage, ServerAnnouncement};
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Process-wide counter used only for naming server instances in logs.
static SERVER_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Hosts background processes and coordinates their shutdown.
///
/// Construction spawns the supervisor immediately and does not block.
pub struct ProcessingServer {
    dispatcher: Dispatcher,
    settings: ServerSettings,
    stopping: CancellationToken,
    stopped: CancellationToken,
    shutdown: CancellationToken,
    stop_sent: AtomicBool,
    disposed: AtomicBool,
    server_id: String,
}

impl ProcessingServer {
    pub fn new(
        processes: Vec<ProcessHandle>,
        storage: Arc<dyn JobStorage>,
        properties: HashMap<String, JsonValue>,
        settings: ServerSettings,
    ) -> Result<Self, ServerError> {
        if processes.is_empty() {
            return Err(ServerError::NoProcesses);
        }

        let number = SERVER_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        let server_id = Uuid::new_v4().to_string();
        let server_name = format!("background-server-{}", number);

        let stopping = CancellationToken::new();
        let stopped = CancellationToken::new();
        let shutdown = CancellationToken::new();

        let ctx = ProcessContext::new(
            server_id.clone(),
            storage,
            Arc::new(properties),
            stopping.clone(),
            stopped.clone(),
            shutdown.clone(),
        );

        info!(
            "Starting {} ({}) with {} background process(es)",
            server_name,
            server_id,
            processes.len()
        );

        let supervisor_settings = settings.clone();
        let dispatcher = Dispatcher::spawn(async move {
            let restart_delay = supervisor_settings.restart_delay();
            let stopping = ctx.stopping_token().clone();
            run_with_restarts(&server_name, restart_delay, stopping, || {
                run_server_loop(ctx.clone(), processes.clone(), supervisor_settings.clone())
            })
            .await;
        });

        Ok(Self {
            dispatcher,
            settings,
            stopping,
            stopped,
            shutdown,
            stop_sent: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            server_id,
        })
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Requests a cooperative stop and arms the escalation timers.
    pub fn send_stop(&self) -> Result<(), ServerError> {
        self.ensure_not_disposed()?;
        self.issue_stop();
        Ok(())
    }

    /// Waits for the supervisor to finish, up to
    /// `shutdown_timeout + last_chance_timeout`. Returns whether it did.
    pub async fn wait_for_shutdown(&self) -> Result<bool, ServerError> {
        self.ensure_not_disposed()?;
        Ok(self.dispatcher.wait(self.teardown_deadline()).await)
    }

    /// [`Self::send_stop`] followed by [`Self::wait_for_shutdown`].
    pub async fn shutdown(&self) -> Result<bool, ServerError> {
        self.send_stop()?;
        self.wait_for_shutdown().await
    }

    /// Stops the server, waits out the shutdown ladder, and releases the
    /// cancellation sources. Calling it more than once has the same
    /// observable effect as calling it once.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.issue_stop();
        let deadline = self.teardown_deadline();
        if !self.dispatcher.wait(deadline).await {
            warn!(
                "Server {} did not stop within {:?}, aborting its supervisor",
                self.server_id, deadline
            );
            self.dispatcher.abort();
        }

        // Release the remaining sources in ladder order.
        self.stopped.cancel();
        self.shutdown.cancel();
        debug!("Server {} disposed", self.server_id);
    }

    fn issue_stop(&self) {
        if self.stop_sent.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Stop requested for server {}", self.server_id);
        self.stopping.cancel();

        let stopped = self.stopped.clone();
        let shutdown = self.shutdown.clone();
        let stop_timeout = self.settings.stop_timeout();
        let shutdown_timeout = self.settings.shutdown_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(stop_timeout).await;
            stopped.cancel();
            tokio::time::sleep(shutdown_timeout.saturating_sub(stop_timeout)).await;
            shutdown.cancel();
        });
    }

    fn teardown_deadline(&self) -> std::time::Duration {
        self.settings.shutdown_timeout() + self.settings.last_chance_timeout()
    }

    fn ensure_not_disposed(&self) -> Result<(), ServerError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ServerError::Disposed);
        }
        Ok(())
    }
}

impl Drop for ProcessingServer {
    fn drop(&mut self) {
        if !self.disposed.load(Ordering::SeqCst) {
            self.stopping.cancel();
            self.stopped.cancel();
            self.shutdown.cancel();
            self.dispatcher.abort();
        }
    }
}

/// One pass of the supervisor: announce, run processes, heartbeat until
/// stopping, drain, remove. An error escaping this function is retried by
/// the restart envelope around it.
async fn run_server_loop(
    ctx: ProcessContext,
    processes: Vec<ProcessHandle>,
    settings: ServerSettings,
) -> anyhow::Result<()> {
    let connection = ctx.storage.connect()?;
    connection.announce_server(
        &ctx.server_id,
        &ServerAnnouncement {
            process_count: processes.len(),
            started_at: Utc::now(),
            properties: ctx.properties.as_ref().clone(),
        },
    )?;

    let policy = RetryPolicy::from_settings(&settings.retry);
    let tasks: Vec<_> = processes
        .into_iter()
        .map(|process| {
            let envelope =
                InfiniteLoopProcess::new(AutomaticRetryProcess::new(process, policy.clone()));
            let process_ctx = ctx.clone();
            let restart_delay = settings.restart_delay();
            tokio::spawn(async move {
                let name = envelope.name();
                let stopping = process_ctx.stopping_token().clone();
                debug!("Starting background process {}", name);
                run_with_restarts(name, restart_delay, stopping, || {
                    envelope.run(&process_ctx)
                })
                .await;
                debug!("Background process {} stopped", name);
            })
        })
        .collect();

    let mut heartbeat = tokio::time::interval(settings.heartbeat_interval());
    // The interval fires immediately; the announcement above covers that.
    heartbeat.tick().await;
    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if let Err(cause) = connection.heartbeat(&ctx.server_id) {
                    warn!("Heartbeat for server {} failed: {:#}", ctx.server_id, cause);
                }
            }
            _ = ctx.stopping_token().cancelled() => break,
        }
    }

    info!(
        "Server {} draining {} background process(es)",
        ctx.server_id,
        tasks.len()
    );
    tokio::select! {
        _ = join_all(tasks) => {
            debug!("All background processes of server {} finished", ctx.server_id);
        }
        _ = ctx.shutdown_token().cancelled() => {
            warn!(
                "Server {} abandoning the wait for its background processes",
                ctx.server_id
            );
        }
    }

    connection.remove_server(&ctx.server_id)?;
    Ok(())
}
