//! Admission checks that keep a request from being processed twice.
//!
//! The chat platform's reactions are the only state: every decision here is
//! made against a snapshot the caller fetched for this one event.

use std::collections::BTreeSet;

use crate::{MarkerState, Reaction, APPROVAL_SIGNAL};

#[derive(Debug, Clone, PartialEq, Eq)]
/// A mention of the bot.
pub struct MentionEvent {
    pub channel_id: String,
    pub user_id: String,
    pub ts: String,
    pub text: String,
    pub edited: bool,
    pub bot_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A reaction added to some message.
pub struct ReactionEvent {
    pub channel_id: String,
    pub user_id: String,
    pub reaction: String,
    pub item_ts: String,
    pub item_user: Option<String>,
    pub bot_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// A message as fetched from channel history.
pub struct MessageSnapshot {
    pub ts: String,
    pub user: Option<String>,
    pub bot_id: Option<String>,
    pub text: String,
    pub edited: bool,
    pub reactions: Vec<Reaction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Enumerates supported `IgnoreReason` values.
pub enum IgnoreReason {
    Edited,
    BotActor,
    ChannelNotAllowed,
    NotApprovalSignal,
    DuplicateApproval { count: u64, first_user: Option<String> },
    NotAddressedToBot,
    BotAuthoredTarget,
    AlreadyProcessed(MarkerState),
    TargetMissing,
}

impl IgnoreReason {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Edited => "edited_message",
            Self::BotActor => "bot_actor",
            Self::ChannelNotAllowed => "channel_not_allowed",
            Self::NotApprovalSignal => "not_approval_signal",
            Self::DuplicateApproval { .. } => "duplicate_approval",
            Self::NotAddressedToBot => "not_addressed_to_bot",
            Self::BotAuthoredTarget => "bot_authored_target",
            Self::AlreadyProcessed(_) => "already_processed",
            Self::TargetMissing => "target_missing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Enumerates supported `GuardDecision` values.
pub enum GuardDecision {
    Process,
    Ignore(IgnoreReason),
}

impl GuardDecision {
    pub fn should_process(&self) -> bool {
        matches!(self, Self::Process)
    }
}

/// Evaluates mention, reaction, and approval-target snapshots.
pub struct IdempotencyGuard<'a> {
    allowed_channels: &'a BTreeSet<String>,
    bot_user_id: &'a str,
}

impl<'a> IdempotencyGuard<'a> {
    pub fn new(allowed_channels: &'a BTreeSet<String>, bot_user_id: &'a str) -> Self {
        Self {
            allowed_channels,
            bot_user_id,
        }
    }

    fn is_bot_actor(&self, user_id: &str, bot_id: Option<&str>) -> bool {
        bot_id.is_some() || user_id == self.bot_user_id
    }

    /// Decides whether a mention starts a new request. `current_markers` are
    /// the reactions currently on the mention message.
    pub fn should_process_mention(
        &self,
        event: &MentionEvent,
        current_markers: &[Reaction],
    ) -> GuardDecision {
        let prefilter = self.prefilter_mention(event);
        if !prefilter.should_process() {
            return prefilter;
        }
        let state = MarkerState::from_reactions(current_markers, self.bot_user_id);
        if state.is_past_pending() {
            return GuardDecision::Ignore(IgnoreReason::AlreadyProcessed(state));
        }
        GuardDecision::Process
    }

    /// Mention checks that need no API call: edit flag, actor, and channel.
    pub fn prefilter_mention(&self, event: &MentionEvent) -> GuardDecision {
        if event.edited {
            return GuardDecision::Ignore(IgnoreReason::Edited);
        }
        if self.is_bot_actor(&event.user_id, event.bot_id.as_deref()) {
            return GuardDecision::Ignore(IgnoreReason::BotActor);
        }
        if !self.allowed_channels.contains(&event.channel_id) {
            return GuardDecision::Ignore(IgnoreReason::ChannelNotAllowed);
        }
        GuardDecision::Process
    }

    /// Checks that need no API call: actor, channel, and reaction name.
    pub fn prefilter_reaction(&self, event: &ReactionEvent) -> GuardDecision {
        if self.is_bot_actor(&event.user_id, event.bot_id.as_deref()) {
            return GuardDecision::Ignore(IgnoreReason::BotActor);
        }
        if !self.allowed_channels.contains(&event.channel_id) {
            return GuardDecision::Ignore(IgnoreReason::ChannelNotAllowed);
        }
        if event.reaction != APPROVAL_SIGNAL {
            return GuardDecision::Ignore(IgnoreReason::NotApprovalSignal);
        }
        GuardDecision::Process
    }

    /// Admits an approval only when the message carries exactly one approval
    /// signal and it was placed by the reacting user. Only the first recorded
    /// signaling user is compared.
    pub fn should_process_reaction(
        &self,
        event: &ReactionEvent,
        current_reactions: &[Reaction],
    ) -> GuardDecision {
        let prefilter = self.prefilter_reaction(event);
        if !prefilter.should_process() {
            return prefilter;
        }
        let approval = current_reactions
            .iter()
            .find(|reaction| reaction.name == APPROVAL_SIGNAL);
        let count = approval.map_or(0, |reaction| reaction.count);
        let first_user = approval.and_then(|reaction| reaction.users.first().cloned());
        if count != 1 || first_user.as_deref() != Some(event.user_id.as_str()) {
            return GuardDecision::Ignore(IgnoreReason::DuplicateApproval { count, first_user });
        }
        GuardDecision::Process
    }

    /// Checks the message an approval points at.
    pub fn should_process_approval_target(&self, message: &MessageSnapshot) -> GuardDecision {
        if message.edited {
            return GuardDecision::Ignore(IgnoreReason::Edited);
        }
        let author = message.user.as_deref().unwrap_or_default();
        if self.is_bot_actor(author, message.bot_id.as_deref()) {
            return GuardDecision::Ignore(IgnoreReason::BotAuthoredTarget);
        }
        let mention = format!("<@{}>", self.bot_user_id);
        if !message.text.contains(&mention) {
            return GuardDecision::Ignore(IgnoreReason::NotAddressedToBot);
        }
        let state = MarkerState::from_reactions(&message.reactions, self.bot_user_id);
        if state.is_past_pending() {
            return GuardDecision::Ignore(IgnoreReason::AlreadyProcessed(state));
        }
        GuardDecision::Process
    }
}
