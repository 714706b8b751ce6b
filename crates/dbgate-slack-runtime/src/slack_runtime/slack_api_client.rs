//! Slack Web API client for markers, thread replies, history lookup, and
//! file delivery.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use dbgate_approval::{MessageSnapshot, Reaction};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::ChatSurface;

#[derive(Debug, Clone, Deserialize)]
struct SlackAuthTestResponse {
    ok: bool,
    user_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackAckResponse {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackChatMessageResponse {
    ok: bool,
    ts: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SlackMessagePayload {
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    edited: Option<Value>,
    #[serde(default)]
    reactions: Vec<Reaction>,
}

impl SlackMessagePayload {
    fn into_snapshot(self, fallback_ts: &str) -> MessageSnapshot {
        MessageSnapshot {
            ts: self.ts.unwrap_or_else(|| fallback_ts.to_string()),
            user: self.user,
            bot_id: self.bot_id,
            text: self.text.unwrap_or_default(),
            edited: self.edited.is_some_and(|value| !value.is_null()),
            reactions: self.reactions,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SlackReactionsGetResponse {
    ok: bool,
    #[serde(default)]
    message: Option<SlackMessagePayload>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackHistoryResponse {
    ok: bool,
    #[serde(default)]
    messages: Vec<SlackMessagePayload>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackConversationsOpenResponse {
    ok: bool,
    channel: Option<SlackChannelRef>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackChannelRef {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackGetUploadUrlExternalResponse {
    ok: bool,
    upload_url: Option<String>,
    file_id: Option<String>,
    error: Option<String>,
}

#[derive(Clone)]
/// Bot-token Slack client. Every call is a single attempt.
pub struct SlackApiClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl SlackApiClient {
    pub fn new(api_base: String, bot_token: String, request_timeout_ms: u64) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("dbgate"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create slack api client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.trim().to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    pub async fn resolve_bot_user_id(&self) -> Result<String> {
        let response: SlackAuthTestResponse = self
            .request_json(
                "auth.test",
                self.http
                    .post(self.method_url("auth.test"))
                    .bearer_auth(&self.bot_token),
            )
            .await?;
        ensure_ok("auth.test", response.ok, response.error)?;
        response
            .user_id
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack auth.test did not return user_id"))
    }

    async fn post_ack(&self, method: &str, payload: Value) -> Result<()> {
        let response: SlackAckResponse = self
            .request_json(
                method,
                self.http
                    .post(self.method_url(method))
                    .bearer_auth(&self.bot_token)
                    .json(&payload),
            )
            .await?;
        ensure_ok(method, response.ok, response.error)
    }

    pub async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()> {
        self.post_ack(
            "reactions.add",
            json!({ "channel": channel, "timestamp": ts, "name": name }),
        )
        .await
    }

    pub async fn remove_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()> {
        self.post_ack(
            "reactions.remove",
            json!({ "channel": channel, "timestamp": ts, "name": name }),
        )
        .await
    }

    pub async fn get_reactions(&self, channel: &str, ts: &str) -> Result<Vec<Reaction>> {
        let response: SlackReactionsGetResponse = self
            .request_json(
                "reactions.get",
                self.http
                    .get(self.method_url("reactions.get"))
                    .bearer_auth(&self.bot_token)
                    .query(&[("channel", channel), ("timestamp", ts), ("full", "true")]),
            )
            .await?;
        ensure_ok("reactions.get", response.ok, response.error)?;
        Ok(response
            .message
            .map(|message| message.reactions)
            .unwrap_or_default())
    }

    pub async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<String> {
        let mut payload = json!({
            "channel": channel,
            "text": text,
            "unfurl_links": false,
            "unfurl_media": false,
        });
        if let Some(thread_ts) = thread_ts {
            payload["thread_ts"] = Value::String(thread_ts.to_string());
        }

        let response: SlackChatMessageResponse = self
            .request_json(
                "chat.postMessage",
                self.http
                    .post(self.method_url("chat.postMessage"))
                    .bearer_auth(&self.bot_token)
                    .json(&payload),
            )
            .await?;
        ensure_ok("chat.postMessage", response.ok, response.error)?;
        response
            .ts
            .ok_or_else(|| anyhow!("slack chat.postMessage response missing ts"))
    }

    pub async fn fetch_history_message(
        &self,
        channel: &str,
        ts: &str,
    ) -> Result<Option<MessageSnapshot>> {
        let response: SlackHistoryResponse = self
            .request_json(
                "conversations.history",
                self.http
                    .get(self.method_url("conversations.history"))
                    .bearer_auth(&self.bot_token)
                    .query(&[
                        ("channel", channel),
                        ("latest", ts),
                        ("limit", "1"),
                        ("inclusive", "true"),
                    ]),
            )
            .await?;
        ensure_ok("conversations.history", response.ok, response.error)?;
        Ok(response
            .messages
            .into_iter()
            .next()
            .map(|message| message.into_snapshot(ts))
            .filter(|message| message.ts == ts))
    }

    pub async fn open_conversation(&self, user_id: &str) -> Result<String> {
        let response: SlackConversationsOpenResponse = self
            .request_json(
                "conversations.open",
                self.http
                    .post(self.method_url("conversations.open"))
                    .bearer_auth(&self.bot_token)
                    .json(&json!({ "users": user_id })),
            )
            .await?;
        ensure_ok("conversations.open", response.ok, response.error)?;
        response
            .channel
            .map(|channel| channel.id)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| anyhow!("slack conversations.open did not return a channel id"))
    }

    pub async fn upload_file_v2(&self, channel: &str, filename: &str, bytes: &[u8]) -> Result<String> {
        if filename.trim().is_empty() {
            bail!("slack files upload requires non-empty filename");
        }
        let file_size = bytes.len();
        if file_size == 0 {
            bail!("slack files upload requires non-empty payload");
        }

        let get_upload: SlackGetUploadUrlExternalResponse = self
            .request_json(
                "files.getUploadURLExternal",
                self.http
                    .post(self.method_url("files.getUploadURLExternal"))
                    .bearer_auth(&self.bot_token)
                    .form(&[
                        ("filename", filename.to_string()),
                        ("length", file_size.to_string()),
                    ]),
            )
            .await?;
        ensure_ok(
            "files.getUploadURLExternal",
            get_upload.ok,
            get_upload.error,
        )?;
        let upload_url = get_upload
            .upload_url
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack files.getUploadURLExternal missing upload_url"))?;
        let file_id = get_upload
            .file_id
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack files.getUploadURLExternal missing file_id"))?;

        let upload_response = self
            .http
            .post(upload_url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await
            .context("failed to upload file payload to slack external upload URL")?;
        if !upload_response.status().is_success() {
            let status = upload_response.status();
            let body = upload_response.text().await.unwrap_or_default();
            bail!(
                "slack external upload failed: status={} body={}",
                status,
                truncate_for_error(&body, 320)
            );
        }

        self.post_ack(
            "files.completeUploadExternal",
            json!({
                "files": [{ "id": file_id.clone(), "title": filename }],
                "channel_id": channel,
            }),
        )
        .await?;
        tracing::info!(channel, filename, file_id = %file_id, bytes = file_size, "file uploaded");
        Ok(file_id)
    }

    async fn request_json<T>(&self, operation: &str, request: reqwest::RequestBuilder) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = request
            .send()
            .await
            .with_context(|| format!("slack api {operation} request failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "slack api {operation} failed with status {}: {}",
                status.as_u16(),
                truncate_for_error(&body, 800)
            );
        }
        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to decode slack {operation}"))
    }
}

fn ensure_ok(operation: &str, ok: bool, error: Option<String>) -> Result<()> {
    if ok {
        return Ok(());
    }
    bail!(
        "slack {operation} failed: {}",
        error.unwrap_or_else(|| "unknown error".to_string())
    )
}

fn truncate_for_error(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated = text.chars().take(max_chars).collect::<String>();
    format!("{truncated}...")
}

#[async_trait]
impl ChatSurface for SlackApiClient {
    async fn add_marker(&self, channel: &str, ts: &str, name: &str) -> Result<()> {
        self.add_reaction(channel, ts, name).await
    }

    async fn remove_marker(&self, channel: &str, ts: &str, name: &str) -> Result<()> {
        self.remove_reaction(channel, ts, name).await
    }

    async fn list_reactions(&self, channel: &str, ts: &str) -> Result<Vec<Reaction>> {
        self.get_reactions(channel, ts).await
    }

    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<()> {
        SlackApiClient::post_message(self, channel, text, thread_ts)
            .await
            .map(|_| ())
    }

    async fn fetch_message(&self, channel: &str, ts: &str) -> Result<Option<MessageSnapshot>> {
        self.fetch_history_message(channel, ts).await
    }

    async fn open_direct_message(&self, user_id: &str) -> Result<String> {
        self.open_conversation(user_id).await
    }

    async fn upload_file(&self, channel: &str, filename: &str, bytes: &[u8]) -> Result<()> {
        self.upload_file_v2(channel, filename, bytes)
            .await
            .map(|_| ())
    }
}
