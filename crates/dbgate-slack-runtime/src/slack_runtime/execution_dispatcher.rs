//! Production execution: bounded job queue, worker pool, and finalization.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use dbgate_approval::{Command, CommandRequest, MarkerEvent, MarkerState};
use dbgate_postgres::{
    plan_dump_parts, read_dump_part, DumpRunner, QueryExecutor, QueryOutcome, TargetEnvironment,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::chat_surface::{swap_markers, SideEffect};
use super::gate_render_helpers::{render_code_block, DONE_TEXT, NO_RESULTS_TEXT};
use super::ChatSurface;

#[derive(Debug, Clone, PartialEq, Eq)]
/// One approved request waiting for a worker.
pub struct ExecutionJob {
    pub channel_id: String,
    pub message_ts: String,
    /// Author of the approved message; results are delivered to them.
    pub requester: String,
    pub approver: String,
    pub command: Command,
    pub request: CommandRequest,
    /// Marker state after the approval swap.
    pub marker_state: MarkerState,
}

#[derive(Clone)]
/// Sending half of the execution queue. Enqueue never waits for completion.
pub struct ExecutionQueue {
    sender: mpsc::Sender<ExecutionJob>,
}

/// Receiving half, shared by every worker.
pub type ExecutionReceiver = Arc<Mutex<mpsc::Receiver<ExecutionJob>>>;

impl ExecutionQueue {
    pub fn bounded(capacity: usize) -> (Self, ExecutionReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, Arc::new(Mutex::new(receiver)))
    }

    /// Queues `job` without waiting; hands the job back when the queue is
    /// full or closed.
    pub fn try_enqueue(&self, job: ExecutionJob) -> Result<(), ExecutionJob> {
        self.sender.try_send(job).map_err(|error| match error {
            mpsc::error::TrySendError::Full(job) | mpsc::error::TrySendError::Closed(job) => job,
        })
    }

    pub fn depth(&self) -> usize {
        self.sender
            .max_capacity()
            .saturating_sub(self.sender.capacity())
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}

/// Runs approved jobs against production and reports back to the thread.
pub struct ExecutionDispatcher {
    chat: Arc<dyn ChatSurface>,
    executor: Arc<dyn QueryExecutor>,
    dump_runner: Arc<dyn DumpRunner>,
    scratch_dir: PathBuf,
    dump_part_size: u64,
}

impl ExecutionDispatcher {
    pub fn new(
        chat: Arc<dyn ChatSurface>,
        executor: Arc<dyn QueryExecutor>,
        dump_runner: Arc<dyn DumpRunner>,
        scratch_dir: PathBuf,
        dump_part_size: u64,
    ) -> Self {
        Self {
            chat,
            executor,
            dump_runner,
            scratch_dir,
            dump_part_size: dump_part_size.max(1),
        }
    }

    pub async fn run(&self, job: &ExecutionJob) -> Result<MarkerState> {
        tracing::info!(
            channel = %job.channel_id,
            ts = %job.message_ts,
            command = %job.command,
            resource = %job.request.resource,
            approver = %job.approver,
            "executing approved request"
        );
        match job.command {
            Command::Read => self.run_read(job).await,
            Command::Write => self.run_write(job).await,
            Command::Dump => self.run_dump(job).await,
        }
    }

    async fn run_read(&self, job: &ExecutionJob) -> Result<MarkerState> {
        let outcome = match self
            .executor
            .execute(
                TargetEnvironment::Production,
                &job.request.resource,
                &job.request.payload,
                true,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => return self.finalize_failure(job, &error.render_failure()).await,
        };
        match outcome {
            QueryOutcome::Rows(table) if table.is_empty() => {
                self.reply(job, &render_code_block(NO_RESULTS_TEXT)).await;
            }
            QueryOutcome::Rows(table) => {
                let filename = format!("{}.csv", job.request.resource);
                if let Err(error) = self
                    .deliver_to_requester(job, &filename, table.to_csv().as_bytes())
                    .await
                {
                    return self
                        .finalize_failure(job, &format!("Failed to deliver results: {error}"))
                        .await;
                }
            }
            QueryOutcome::Status(status) => {
                self.reply(job, &render_code_block(&status)).await;
            }
        }
        self.finalize_success(job).await
    }

    async fn run_write(&self, job: &ExecutionJob) -> Result<MarkerState> {
        let outcome = self
            .executor
            .execute(
                TargetEnvironment::Production,
                &job.request.resource,
                &job.request.payload,
                false,
            )
            .await;
        let status = match outcome {
            Ok(QueryOutcome::Status(status)) => status,
            Ok(QueryOutcome::Rows(table)) => format!("{} rows returned", table.row_count()),
            Err(error) => return self.finalize_failure(job, &error.render_failure()).await,
        };
        self.reply(job, &render_code_block(&status)).await;
        self.finalize_success(job).await
    }

    async fn run_dump(&self, job: &ExecutionJob) -> Result<MarkerState> {
        let resource = job.request.resource.as_str();
        let dump_path = match self.dump_runner.dump(resource, &self.scratch_dir).await {
            Ok(path) => path,
            Err(error) => return self.finalize_failure(job, &error.render_failure()).await,
        };
        let delivered = self.deliver_dump(job, &dump_path).await;
        if let Err(error) = tokio::fs::remove_file(&dump_path).await {
            tracing::warn!(path = %dump_path.display(), %error, "failed to remove dump file");
        }
        match delivered {
            Ok(parts) => {
                tracing::info!(resource, parts, "dump delivered");
                self.finalize_success(job).await
            }
            Err(error) => {
                self.finalize_failure(job, &format!("Failed to deliver dump: {error:#}"))
                    .await
            }
        }
    }

    async fn deliver_dump(&self, job: &ExecutionJob, dump_path: &std::path::Path) -> Result<usize> {
        let total = tokio::fs::metadata(dump_path)
            .await
            .with_context(|| format!("failed to stat {}", dump_path.display()))?
            .len();
        let parts = plan_dump_parts(&job.request.resource, total, self.dump_part_size);
        let channel = self.chat.open_direct_message(&job.requester).await?;
        for part in &parts {
            let bytes = read_dump_part(dump_path, part)
                .await
                .with_context(|| format!("failed to read {}", part.filename))?;
            self.chat
                .upload_file(&channel, &part.filename, &bytes)
                .await
                .with_context(|| format!("failed to upload {}", part.filename))?;
        }
        Ok(parts.len())
    }

    async fn deliver_to_requester(
        &self,
        job: &ExecutionJob,
        filename: &str,
        bytes: &[u8],
    ) -> Result<()> {
        let channel = self.chat.open_direct_message(&job.requester).await?;
        self.chat.upload_file(&channel, filename, bytes).await
    }

    /// Thread replies never block finalization.
    async fn reply(&self, job: &ExecutionJob, text: &str) -> SideEffect {
        SideEffect::from_result(
            "post_thread_reply",
            self.chat
                .post_message(&job.channel_id, text, Some(&job.message_ts))
                .await,
        )
    }

    async fn finalize_success(&self, job: &ExecutionJob) -> Result<MarkerState> {
        self.reply(job, DONE_TEXT).await;
        swap_markers(
            self.chat.as_ref(),
            &job.channel_id,
            &job.message_ts,
            job.marker_state,
            MarkerEvent::Complete,
        )
        .await
    }

    async fn finalize_failure(
        &self,
        job: &ExecutionJob,
        text: &str,
    ) -> Result<MarkerState> {
        tracing::warn!(
            channel = %job.channel_id,
            ts = %job.message_ts,
            command = %job.command,
            failure = text,
            "execution failed"
        );
        self.reply(job, text).await;
        swap_markers(
            self.chat.as_ref(),
            &job.channel_id,
            &job.message_ts,
            job.marker_state,
            MarkerEvent::Fail,
        )
        .await
    }
}

/// Spawns `count` workers draining `receiver` until every sender is dropped.
pub fn spawn_execution_workers(
    dispatcher: Arc<ExecutionDispatcher>,
    receiver: ExecutionReceiver,
    count: usize,
) -> Vec<JoinHandle<()>> {
    (0..count.max(1))
        .map(|worker| {
            let dispatcher = Arc::clone(&dispatcher);
            let receiver = Arc::clone(&receiver);
            tokio::spawn(async move {
                loop {
                    let job = receiver.lock().await.recv().await;
                    let Some(job) = job else {
                        tracing::debug!(worker, "execution queue closed");
                        break;
                    };
                    if let Err(error) = dispatcher.run(&job).await {
                        tracing::error!(
                            worker,
                            channel = %job.channel_id,
                            ts = %job.message_ts,
                            error = %format!("{error:#}"),
                            "execution job failed"
                        );
                    }
                }
            })
        })
        .collect()
}
