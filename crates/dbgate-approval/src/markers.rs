//! Message marker model: the reactions dbgate applies to a request message are
//! its only durable state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MARKER_PENDING: &str = "eyes";
pub const MARKER_IN_PROGRESS: &str = "60fps_parrot";
pub const MARKER_SUCCESS: &str = "white_check_mark";
pub const MARKER_FAILURE: &str = "x";
pub const MARKER_PARSE_FAILURE: &str = "computerrage";
/// Reaction an approver adds to grant approval.
pub const APPROVAL_SIGNAL: &str = "white_check_mark";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// One reaction entry as reported by the chat platform.
pub struct Reaction {
    pub name: String,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub users: Vec<String>,
}

impl Reaction {
    fn applied_by(&self, user_id: &str) -> bool {
        self.users.iter().any(|user| user == user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Which failure marker a rejection carries.
pub enum FailureMarker {
    /// Rejected or failed request (`x`).
    Rejected,
    /// Request text could not be understood (`computerrage`).
    Unparseable,
}

impl FailureMarker {
    pub fn marker_name(self) -> &'static str {
        match self {
            Self::Rejected => MARKER_FAILURE,
            Self::Unparseable => MARKER_PARSE_FAILURE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Per-message lifecycle: `Unmarked -> Pending -> InProgress -> {Succeeded, Failed}`.
pub enum MarkerState {
    Unmarked,
    Pending,
    InProgress,
    Succeeded,
    Failed(FailureMarker),
}

impl MarkerState {
    /// Derives the state from the reactions the bot itself applied. Reactions
    /// added by people (an approver's check mark) never count as markers.
    pub fn from_reactions(reactions: &[Reaction], bot_user_id: &str) -> Self {
        let has = |name: &str| {
            reactions
                .iter()
                .any(|reaction| reaction.name == name && reaction.applied_by(bot_user_id))
        };
        if has(MARKER_SUCCESS) {
            Self::Succeeded
        } else if has(MARKER_FAILURE) {
            Self::Failed(FailureMarker::Rejected)
        } else if has(MARKER_PARSE_FAILURE) {
            Self::Failed(FailureMarker::Unparseable)
        } else if has(MARKER_IN_PROGRESS) {
            Self::InProgress
        } else if has(MARKER_PENDING) {
            Self::Pending
        } else {
            Self::Unmarked
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unmarked => "unmarked",
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
        }
    }

    pub fn marker_name(self) -> Option<&'static str> {
        match self {
            Self::Unmarked => None,
            Self::Pending => Some(MARKER_PENDING),
            Self::InProgress => Some(MARKER_IN_PROGRESS),
            Self::Succeeded => Some(MARKER_SUCCESS),
            Self::Failed(kind) => Some(kind.marker_name()),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }

    /// True once execution has started or finished; such messages are never
    /// picked up again.
    pub fn is_past_pending(self) -> bool {
        self.is_terminal() || self == Self::InProgress
    }
}

impl std::fmt::Display for MarkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Events that move a message through its lifecycle.
pub enum MarkerEvent {
    /// The bot saw the request.
    Acknowledge,
    /// The request was refused before execution.
    Reject(FailureMarker),
    /// An authorized approver approved the request.
    Approve,
    /// Production execution finished successfully.
    Complete,
    /// Production execution failed.
    Fail,
}

impl MarkerEvent {
    fn as_str(self) -> &'static str {
        match self {
            Self::Acknowledge => "acknowledge",
            Self::Reject(_) => "reject",
            Self::Approve => "approve",
            Self::Complete => "complete",
            Self::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Marker swap produced by [`transition`]: remove first, then add.
pub struct MarkerTransition {
    pub from: MarkerState,
    pub to: MarkerState,
    pub remove: Option<&'static str>,
    pub add: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Error returned when a marker transition is invalid.
pub enum TransitionError {
    #[error("message is already {state}")]
    AlreadyFinal { state: MarkerState },
    #[error("invalid marker transition: {from} on {event}")]
    Invalid {
        from: &'static str,
        event: &'static str,
    },
}

/// The single transition function for message markers.
pub fn transition(
    state: MarkerState,
    event: MarkerEvent,
) -> Result<MarkerTransition, TransitionError> {
    if state.is_terminal() {
        return Err(TransitionError::AlreadyFinal { state });
    }
    let to = match (state, event) {
        (MarkerState::Unmarked, MarkerEvent::Acknowledge) => MarkerState::Pending,
        // The pending marker is best-effort, so a request may still be unmarked.
        (MarkerState::Unmarked | MarkerState::Pending, MarkerEvent::Reject(kind)) => {
            MarkerState::Failed(kind)
        }
        (MarkerState::Unmarked | MarkerState::Pending, MarkerEvent::Approve) => {
            MarkerState::InProgress
        }
        (MarkerState::InProgress, MarkerEvent::Complete) => MarkerState::Succeeded,
        (MarkerState::InProgress, MarkerEvent::Fail) => {
            MarkerState::Failed(FailureMarker::Rejected)
        }
        _ => {
            return Err(TransitionError::Invalid {
                from: state.as_str(),
                event: event.as_str(),
            })
        }
    };
    let add = to.marker_name().ok_or(TransitionError::Invalid {
        from: state.as_str(),
        event: event.as_str(),
    })?;
    Ok(MarkerTransition {
        from: state,
        to,
        remove: state.marker_name(),
        add,
    })
}
