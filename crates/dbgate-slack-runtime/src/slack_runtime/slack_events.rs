//! Events API payload decoding into gate events.

use anyhow::{Context, Result};
use dbgate_approval::{MentionEvent, ReactionEvent};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
/// The two inbound event kinds the gate reacts to.
pub enum GateEvent {
    Mention(MentionEvent),
    Reaction(ReactionEvent),
}

impl GateEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Mention(_) => "app_mention",
            Self::Reaction(_) => "reaction_added",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Top-level webhook body, reduced to what the server acts on.
pub(super) enum SlackEnvelope {
    UrlVerification { challenge: String },
    EventCallback { event_id: String, event: Option<GateEvent> },
    Other { envelope_type: String },
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    envelope_type: String,
    #[serde(default)]
    challenge: Option<String>,
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    event: Option<SlackEventPayload>,
}

#[derive(Debug, Deserialize)]
struct SlackEventPayload {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    edited: Option<Value>,
    #[serde(default)]
    reaction: Option<String>,
    #[serde(default)]
    item: Option<SlackReactionItem>,
    #[serde(default)]
    item_user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackReactionItem {
    #[serde(rename = "type", default)]
    item_type: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

pub(super) fn parse_slack_envelope(body: &[u8]) -> Result<SlackEnvelope> {
    let raw = serde_json::from_slice::<RawEnvelope>(body)
        .context("failed to parse slack events payload")?;
    Ok(match raw.envelope_type.as_str() {
        "url_verification" => SlackEnvelope::UrlVerification {
            challenge: raw.challenge.unwrap_or_default(),
        },
        "event_callback" => SlackEnvelope::EventCallback {
            event_id: raw.event_id.unwrap_or_default(),
            event: raw.event.and_then(normalize_event),
        },
        _ => SlackEnvelope::Other {
            envelope_type: raw.envelope_type,
        },
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn normalize_event(event: SlackEventPayload) -> Option<GateEvent> {
    match event.event_type.as_str() {
        "app_mention" => Some(GateEvent::Mention(MentionEvent {
            channel_id: non_empty(event.channel)?,
            user_id: event.user.unwrap_or_default(),
            ts: non_empty(event.ts)?,
            text: event.text.unwrap_or_default(),
            edited: event.edited.is_some_and(|value| !value.is_null()),
            bot_id: non_empty(event.bot_id),
        })),
        "reaction_added" => {
            let item = event.item?;
            if item.item_type.as_deref().is_some_and(|kind| kind != "message") {
                return None;
            }
            Some(GateEvent::Reaction(ReactionEvent {
                channel_id: non_empty(item.channel)?,
                user_id: event.user.unwrap_or_default(),
                reaction: event.reaction.unwrap_or_default(),
                item_ts: non_empty(item.ts)?,
                item_user: non_empty(event.item_user),
                bot_id: non_empty(event.bot_id),
            }))
        }
        _ => None,
    }
}
