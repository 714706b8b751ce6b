//! Slack runtime for dbgate: Events API webhook, Web API client, approval
//! handlers, and the production execution worker pool.

mod slack_runtime;

pub use slack_runtime::{
    run_slack_gate, spawn_execution_workers, ApprovalRuntime, ChatSurface, ExecutionDispatcher,
    ExecutionJob, ExecutionQueue, ExecutionReceiver, GateEvent, GateOutcome, RejectionKind,
    SideEffect, SlackApiClient, SlackGateRuntimeConfig,
};
