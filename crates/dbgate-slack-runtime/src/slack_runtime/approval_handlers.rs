//! Mention and approval-reaction handlers.
//!
//! Both entry points re-read markers from Slack on every event; the
//! reactions on a request message are the only state the gate keeps.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use dbgate_approval::{
    parse_command_request, payload_is_unsafe, unsafe_payload_warning, ApproverLookup, Command,
    CommandRequest, FailureMarker, GatePolicy, GuardDecision, IdempotencyGuard, IgnoreReason,
    MarkerEvent, MarkerState, MentionEvent, ReactionEvent,
};
use dbgate_postgres::{QueryExecutor, TargetEnvironment};

use super::chat_surface::{swap_markers, SideEffect};
use super::execution_dispatcher::{ExecutionJob, ExecutionQueue};
use super::gate_render_helpers::{
    render_approval_ack, render_approval_request, render_invalid_command, render_parse_failure,
    render_preview_outcome,
};
use super::{ChatSurface, GateEvent};

const QUEUE_FULL_TEXT: &str = "Execution queue is full, request was not run. Ask for a new approval later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Why a request was refused with a failure marker.
pub enum RejectionKind {
    Unparseable,
    UnsafePayload,
    InvalidCommand,
    QueueFull,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What a handler did with one event.
pub enum GateOutcome {
    Ignored(IgnoreReason),
    Rejected(RejectionKind),
    AwaitingApproval(Command),
    UnauthorizedApprover,
    Dispatched(Command),
}

/// Approval state machine over a chat surface and a preview executor.
pub struct ApprovalRuntime {
    policy: Arc<GatePolicy>,
    bot_user_id: String,
    chat: Arc<dyn ChatSurface>,
    executor: Arc<dyn QueryExecutor>,
    queue: ExecutionQueue,
}

impl ApprovalRuntime {
    pub fn new(
        policy: Arc<GatePolicy>,
        bot_user_id: String,
        chat: Arc<dyn ChatSurface>,
        executor: Arc<dyn QueryExecutor>,
        queue: ExecutionQueue,
    ) -> Self {
        Self {
            policy,
            bot_user_id,
            chat,
            executor,
            queue,
        }
    }

    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    fn guard(&self) -> IdempotencyGuard<'_> {
        IdempotencyGuard::new(self.policy.channels(), &self.bot_user_id)
    }

    pub async fn handle_event(&self, event: &GateEvent) -> Result<GateOutcome> {
        match event {
            GateEvent::Mention(mention) => self.on_mention(mention).await,
            GateEvent::Reaction(reaction) => self.on_reaction(reaction).await,
        }
    }

    pub async fn on_mention(&self, event: &MentionEvent) -> Result<GateOutcome> {
        let guard = self.guard();
        if let GuardDecision::Ignore(reason) = guard.prefilter_mention(event) {
            return Ok(ignored(&event.channel_id, &event.ts, reason));
        }
        let markers = self.chat.list_reactions(&event.channel_id, &event.ts).await?;
        if let GuardDecision::Ignore(reason) = guard.should_process_mention(event, &markers) {
            return Ok(ignored(&event.channel_id, &event.ts, reason));
        }

        let mut state = MarkerState::from_reactions(&markers, &self.bot_user_id);
        if state == MarkerState::Unmarked {
            state = swap_markers(
                self.chat.as_ref(),
                &event.channel_id,
                &event.ts,
                state,
                MarkerEvent::Acknowledge,
            )
            .await?;
        }

        let request = match parse_command_request(&event.text) {
            Ok(request) => request,
            Err(error) => {
                tracing::info!(channel = %event.channel_id, ts = %event.ts, %error, "mention could not be parsed");
                return self
                    .reject(
                        &event.channel_id,
                        &event.ts,
                        state,
                        &render_parse_failure(&error),
                        RejectionKind::Unparseable,
                    )
                    .await;
            }
        };

        if payload_is_unsafe(&request.payload) {
            return self
                .reject(
                    &event.channel_id,
                    &event.ts,
                    state,
                    &unsafe_payload_warning(),
                    RejectionKind::UnsafePayload,
                )
                .await;
        }

        let (command, approvers) = match self.policy.lookup_for_mention(&request.keyword) {
            ApproverLookup::Known { command, approvers } => (command, approvers),
            ApproverLookup::Unknown => {
                return self
                    .reject(
                        &event.channel_id,
                        &event.ts,
                        state,
                        &render_invalid_command(&request.keyword),
                        RejectionKind::InvalidCommand,
                    )
                    .await;
            }
        };

        let preview = if command.has_preview() {
            Some(self.preview(command, &request).await)
        } else {
            None
        };
        let text = render_approval_request(
            &request,
            preview
                .as_ref()
                .map(|(summary, elapsed)| (summary.as_str(), *elapsed)),
            approvers,
        );
        self.chat
            .post_message(&event.channel_id, &text, Some(&event.ts))
            .await?;
        tracing::info!(
            channel = %event.channel_id,
            ts = %event.ts,
            command = %command,
            resource = %request.resource,
            "approval requested"
        );
        Ok(GateOutcome::AwaitingApproval(command))
    }

    /// Dry run against preproduction. Failures become the summary text.
    async fn preview(
        &self,
        command: Command,
        request: &CommandRequest,
    ) -> (String, std::time::Duration) {
        let started = Instant::now();
        let result = self
            .executor
            .execute(
                TargetEnvironment::Preproduction,
                &request.resource,
                &request.payload,
                command.is_read_only(),
            )
            .await;
        let elapsed = started.elapsed();
        if let Err(error) = &result {
            tracing::info!(resource = %request.resource, %error, "preview failed");
        }
        (render_preview_outcome(&result), elapsed)
    }

    pub async fn on_reaction(&self, event: &ReactionEvent) -> Result<GateOutcome> {
        let guard = self.guard();
        if let GuardDecision::Ignore(reason) = guard.prefilter_reaction(event) {
            return Ok(ignored(&event.channel_id, &event.item_ts, reason));
        }
        let reactions = self
            .chat
            .list_reactions(&event.channel_id, &event.item_ts)
            .await?;
        if let GuardDecision::Ignore(reason) = guard.should_process_reaction(event, &reactions) {
            return Ok(ignored(&event.channel_id, &event.item_ts, reason));
        }
        let Some(message) = self
            .chat
            .fetch_message(&event.channel_id, &event.item_ts)
            .await?
        else {
            return Ok(ignored(
                &event.channel_id,
                &event.item_ts,
                IgnoreReason::TargetMissing,
            ));
        };
        if let GuardDecision::Ignore(reason) = guard.should_process_approval_target(&message) {
            return Ok(ignored(&event.channel_id, &event.item_ts, reason));
        }

        let state = MarkerState::from_reactions(&message.reactions, &self.bot_user_id);
        let request = match parse_command_request(&message.text) {
            Ok(request) => request,
            Err(error) => {
                return self
                    .reject(
                        &event.channel_id,
                        &event.item_ts,
                        state,
                        &render_parse_failure(&error),
                        RejectionKind::Unparseable,
                    )
                    .await;
            }
        };

        let command = match self.policy.authorization().lookup(&request.keyword) {
            ApproverLookup::Known { command, approvers } if approvers.contains(&event.user_id) => {
                command
            }
            _ => {
                tracing::info!(
                    channel = %event.channel_id,
                    ts = %event.item_ts,
                    user = %event.user_id,
                    keyword = %request.keyword,
                    "reaction from non-approver ignored"
                );
                return Ok(GateOutcome::UnauthorizedApprover);
            }
        };

        let marker_state = swap_markers(
            self.chat.as_ref(),
            &event.channel_id,
            &event.item_ts,
            state,
            MarkerEvent::Approve,
        )
        .await?;
        let requester = message.user.clone().unwrap_or_default();
        SideEffect::from_result(
            "post_approval_ack",
            self.chat
                .post_message(
                    &event.channel_id,
                    &render_approval_ack(&requester, &event.user_id),
                    Some(&event.item_ts),
                )
                .await,
        );

        let job = ExecutionJob {
            channel_id: event.channel_id.clone(),
            message_ts: event.item_ts.clone(),
            requester,
            approver: event.user_id.clone(),
            command,
            request,
            marker_state,
        };
        if let Err(job) = self.queue.try_enqueue(job) {
            tracing::warn!(
                channel = %job.channel_id,
                ts = %job.message_ts,
                capacity = self.queue.capacity(),
                "execution queue full"
            );
            SideEffect::from_result(
                "post_queue_full",
                self.chat
                    .post_message(&job.channel_id, QUEUE_FULL_TEXT, Some(&job.message_ts))
                    .await,
            );
            swap_markers(
                self.chat.as_ref(),
                &job.channel_id,
                &job.message_ts,
                job.marker_state,
                MarkerEvent::Fail,
            )
            .await?;
            return Ok(GateOutcome::Rejected(RejectionKind::QueueFull));
        }
        tracing::info!(
            channel = %event.channel_id,
            ts = %event.item_ts,
            command = %command,
            approver = %event.user_id,
            "execution dispatched"
        );
        Ok(GateOutcome::Dispatched(command))
    }

    async fn reject(
        &self,
        channel: &str,
        ts: &str,
        state: MarkerState,
        text: &str,
        kind: RejectionKind,
    ) -> Result<GateOutcome> {
        let posted = SideEffect::from_result(
            "post_rejection",
            self.chat.post_message(channel, text, Some(ts)).await,
        );
        let marker = match kind {
            RejectionKind::UnsafePayload => FailureMarker::Rejected,
            _ => FailureMarker::Unparseable,
        };
        swap_markers(
            self.chat.as_ref(),
            channel,
            ts,
            state,
            MarkerEvent::Reject(marker),
        )
        .await?;
        tracing::info!(channel, ts, ?kind, posted = posted.is_applied(), "request rejected");
        Ok(GateOutcome::Rejected(kind))
    }
}

fn ignored(channel: &str, ts: &str, reason: IgnoreReason) -> GateOutcome {
    tracing::debug!(channel, ts, reason = reason.reason_code(), "event ignored");
    GateOutcome::Ignored(reason)
}
