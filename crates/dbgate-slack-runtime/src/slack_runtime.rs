//! Slack gate runtime: receives Events API webhooks, drives the approval
//! state machine, and runs approved requests on a worker pool.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use dbgate_approval::GatePolicy;
use dbgate_core::reset_scratch_dir;
use dbgate_postgres::{PgDumpRunner, PostgresConfig, PostgresQueryExecutor};
use tokio::net::TcpListener;

mod approval_handlers;
mod chat_surface;
mod execution_dispatcher;
mod gate_render_helpers;
mod slack_api_client;
mod slack_events;
mod slack_webhook;

pub use approval_handlers::{ApprovalRuntime, GateOutcome, RejectionKind};
pub use chat_surface::{ChatSurface, SideEffect};
pub use execution_dispatcher::{
    spawn_execution_workers, ExecutionDispatcher, ExecutionJob, ExecutionQueue, ExecutionReceiver,
};
pub use slack_api_client::SlackApiClient;
pub use slack_events::GateEvent;

use slack_webhook::{build_webhook_router, WebhookState, SLACK_EVENTS_ENDPOINT};

#[derive(Clone)]
/// Runtime configuration for the Slack gate.
pub struct SlackGateRuntimeConfig {
    pub bind: String,
    pub api_base: String,
    pub bot_token: String,
    pub signing_secret: String,
    /// Resolved with `auth.test` when absent.
    pub bot_user_id: Option<String>,
    pub policy: GatePolicy,
    pub postgres: PostgresConfig,
    pub scratch_dir: PathBuf,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub request_timeout_ms: u64,
    pub max_skew_seconds: u64,
    pub dump_part_size_bytes: u64,
}

/// Starts the webhook server and execution workers; returns on Ctrl-C.
pub async fn run_slack_gate(config: SlackGateRuntimeConfig) -> Result<()> {
    let bind_addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid --bind '{}': expected host:port", config.bind))?;
    let scratch_dir = reset_scratch_dir(&config.scratch_dir)?;

    let slack_client = Arc::new(SlackApiClient::new(
        config.api_base.clone(),
        config.bot_token.clone(),
        config.request_timeout_ms,
    )?);
    let bot_user_id = match config
        .bot_user_id
        .clone()
        .filter(|value| !value.trim().is_empty())
    {
        Some(bot_user_id) => bot_user_id,
        None => slack_client
            .resolve_bot_user_id()
            .await
            .context("failed to resolve slack bot user id")?,
    };

    let chat: Arc<dyn ChatSurface> = slack_client;
    let executor = Arc::new(PostgresQueryExecutor::new(config.postgres.clone()));
    let dump_runner = Arc::new(PgDumpRunner::new(config.postgres.clone()));
    let (queue, receiver) = ExecutionQueue::bounded(config.queue_capacity);
    let dispatcher = Arc::new(ExecutionDispatcher::new(
        Arc::clone(&chat),
        executor.clone(),
        dump_runner,
        scratch_dir,
        config.dump_part_size_bytes,
    ));
    let workers = spawn_execution_workers(dispatcher, receiver, config.worker_count);

    let runtime = Arc::new(ApprovalRuntime::new(
        Arc::new(config.policy),
        bot_user_id.clone(),
        chat,
        executor,
        queue,
    ));
    let app = build_webhook_router(Arc::new(WebhookState {
        runtime,
        signing_secret: config.signing_secret,
        max_skew_seconds: config.max_skew_seconds,
    }));

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind slack gate on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve slack gate listen address")?;
    tracing::info!(
        addr = %local_addr,
        endpoint = SLACK_EVENTS_ENDPOINT,
        bot_user_id = %bot_user_id,
        workers = workers.len(),
        queue_capacity = config.queue_capacity,
        "slack gate listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("slack gate server exited unexpectedly")?;
    tracing::info!("slack gate shut down");
    Ok(())
}
