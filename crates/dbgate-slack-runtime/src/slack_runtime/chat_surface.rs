//! Chat platform seam used by the approval handlers and execution workers.

use anyhow::Result;
use async_trait::async_trait;
use dbgate_approval::{transition, MarkerEvent, MarkerState, MessageSnapshot, Reaction};

#[async_trait]
/// Marker, message, and file operations the gate needs from the chat platform.
pub trait ChatSurface: Send + Sync {
    async fn add_marker(&self, channel: &str, ts: &str, name: &str) -> Result<()>;
    async fn remove_marker(&self, channel: &str, ts: &str, name: &str) -> Result<()>;
    async fn list_reactions(&self, channel: &str, ts: &str) -> Result<Vec<Reaction>>;
    async fn post_message(&self, channel: &str, text: &str, thread_ts: Option<&str>)
        -> Result<()>;
    /// Fetches the channel message at exactly `ts`, if it still exists.
    async fn fetch_message(&self, channel: &str, ts: &str) -> Result<Option<MessageSnapshot>>;
    /// Opens (or reuses) the direct-message channel with `user_id`.
    async fn open_direct_message(&self, user_id: &str) -> Result<String>;
    async fn upload_file(&self, channel: &str, filename: &str, bytes: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Outcome of a best-effort side effect. Failures are logged, never raised.
pub enum SideEffect {
    Applied,
    Failed(String),
}

impl SideEffect {
    pub fn from_result(operation: &str, result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::Applied,
            Err(error) => {
                tracing::warn!(operation, error = %format!("{error:#}"), "best-effort side effect failed");
                Self::Failed(error.to_string())
            }
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Applies one marker transition: removes the current marker, then adds the
/// new one. Both calls are best-effort, so the add is always attempted.
/// Returns the logical state after the transition even when the platform
/// rejected one of the calls.
pub(crate) async fn swap_markers(
    chat: &dyn ChatSurface,
    channel: &str,
    ts: &str,
    current: MarkerState,
    event: MarkerEvent,
) -> Result<MarkerState> {
    let step = transition(current, event)?;
    let removed = match step.remove {
        Some(remove) => {
            SideEffect::from_result("remove_marker", chat.remove_marker(channel, ts, remove).await)
        }
        None => SideEffect::Applied,
    };
    let added = SideEffect::from_result(
        "add_marker",
        chat.add_marker(channel, ts, step.add).await,
    );
    tracing::info!(
        channel,
        ts,
        from = %step.from,
        to = %step.to,
        marker = step.add,
        removed = removed.is_applied(),
        applied = added.is_applied(),
        "marker transition"
    );
    Ok(step.to)
}
