use std::time::Duration;

use relay_core::types::{Member, UpstreamMessage, UpstreamUser, Webhook, WebhookPayload};
use relay_core::{RelayError, RelayResult};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::model::{RawMember, RawMessage, RawUser, RawWebhook};

pub const API_BASE: &str = "https://discord.com/api/v10";

/// Authenticated Discord REST client for one bot token.
#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base: String,
    token: String,
}

fn transport(err: reqwest::Error) -> RelayError {
    RelayError::UpstreamUnavailable(err.to_string())
}

pub(crate) fn status_error(status: StatusCode, what: &str) -> RelayError {
    match status {
        StatusCode::NOT_FOUND => RelayError::NotFound(what.to_string()),
        StatusCode::FORBIDDEN => RelayError::Forbidden(format!("Bot cannot access {what}")),
        StatusCode::UNAUTHORIZED => RelayError::Unauthenticated("Invalid bot token".to_string()),
        StatusCode::TOO_MANY_REQUESTS => {
            RelayError::UpstreamUnavailable("rate limited by Discord".to_string())
        }
        other => RelayError::UpstreamUnavailable(format!("HTTP {other}")),
    }
}

/// `payload_json` part of a webhook execution; files are referenced by index.
pub(crate) fn webhook_body(payload: &WebhookPayload) -> Value {
    let attachments: Vec<Value> = payload
        .files
        .iter()
        .enumerate()
        .map(|(i, file)| json!({ "id": i, "filename": file.name }))
        .collect();
    json!({
        "content": payload.content,
        "username": payload.username,
        "avatar_url": payload.avatar_url,
        "attachments": attachments,
        "allowed_mentions": { "parse": ["users"] },
    })
}

impl RestClient {
    pub fn new(token: &str) -> RelayResult<Self> {
        Self::with_base(token, API_BASE)
    }

    pub fn with_base(token: &str, base: &str) -> RelayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("relay (https://github.com, 0.1)")
            .build()
            .map_err(transport)?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base, path))
            .header("Authorization", format!("Bot {}", self.token))
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> RelayResult<Response> {
        let resp = request.send().await.map_err(transport)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(%what, "discord rate limit hit");
        } else {
            debug!(%what, %status, "discord request failed");
        }
        Err(status_error(status, what))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, what: &str) -> RelayResult<T> {
        self.send(self.request(Method::GET, path), what)
            .await?
            .json()
            .await
            .map_err(transport)
    }

    pub async fn current_user(&self) -> RelayResult<UpstreamUser> {
        let user: RawUser = self.get("/users/@me", "User").await?;
        Ok(user.into())
    }

    pub async fn guild_member(&self, guild_id: &str, user_id: &str) -> RelayResult<Member> {
        let member: RawMember = self
            .get(&format!("/guilds/{guild_id}/members/{user_id}"), "Member")
            .await?;
        member
            .into_member()
            .ok_or_else(|| RelayError::NotFound("Member".to_string()))
    }

    pub async fn guild_members(&self, guild_id: &str, limit: u16) -> RelayResult<Vec<Member>> {
        let limit = limit.clamp(1, 1000);
        let members: Vec<RawMember> = self
            .get(&format!("/guilds/{guild_id}/members?limit={limit}"), "Guild")
            .await?;
        Ok(members.into_iter().filter_map(RawMember::into_member).collect())
    }

    pub async fn channel_messages(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: u8,
    ) -> RelayResult<Vec<RawMessage>> {
        let limit = limit.clamp(1, 100);
        let path = match before {
            Some(before) => format!("/channels/{channel_id}/messages?limit={limit}&before={before}"),
            None => format!("/channels/{channel_id}/messages?limit={limit}"),
        };
        self.get(&path, "Channel").await
    }

    pub async fn channel_message(&self, channel_id: &str, message_id: &str) -> RelayResult<RawMessage> {
        self.get(&format!("/channels/{channel_id}/messages/{message_id}"), "Message")
            .await
    }

    pub async fn webhook(&self, webhook_id: &str) -> RelayResult<Option<Webhook>> {
        match self.get::<RawWebhook>(&format!("/webhooks/{webhook_id}"), "Webhook").await {
            Ok(raw) => Ok(Some(raw.into_webhook(""))),
            Err(RelayError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn channel_webhooks(&self, channel_id: &str) -> RelayResult<Vec<Webhook>> {
        let hooks: Vec<RawWebhook> = self
            .get(&format!("/channels/{channel_id}/webhooks"), "Channel")
            .await?;
        Ok(hooks
            .into_iter()
            .map(|raw| raw.into_webhook(channel_id))
            .collect())
    }

    pub async fn create_webhook(&self, channel_id: &str, name: &str) -> RelayResult<Webhook> {
        let request = self
            .request(Method::POST, &format!("/channels/{channel_id}/webhooks"))
            .json(&json!({ "name": name }));
        let raw: RawWebhook = self
            .send(request, "Channel")
            .await?
            .json()
            .await
            .map_err(transport)?;
        Ok(raw.into_webhook(channel_id))
    }

    /// Posts through a webhook and waits for the created message.
    pub async fn execute_webhook(
        &self,
        webhook: &Webhook,
        payload: WebhookPayload,
    ) -> RelayResult<UpstreamMessage> {
        let token = webhook
            .token
            .as_deref()
            .ok_or_else(|| RelayError::InvalidRequest("webhook has no token".to_string()))?;

        let mut form = Form::new().text("payload_json", webhook_body(&payload).to_string());
        for (i, file) in payload.files.into_iter().enumerate() {
            let mut part = Part::bytes(file.data).file_name(file.name);
            if let Some(content_type) = file.content_type.as_deref() {
                part = part
                    .mime_str(content_type)
                    .map_err(|_| RelayError::InvalidRequest(format!("bad content type {content_type}")))?;
            }
            form = form.part(format!("files[{i}]"), part);
        }

        // webhook routes authenticate by token, not by bot header
        let request = self
            .client
            .post(format!("{}/webhooks/{}/{}?wait=true", self.base, webhook.id, token))
            .multipart(form);
        let raw: RawMessage = self
            .send(request, "Webhook")
            .await?
            .json()
            .await
            .map_err(transport)?;
        Ok(raw.into_message(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::types::OutgoingFile;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_error(StatusCode::NOT_FOUND, "Webhook"),
            RelayError::NotFound("Webhook".to_string())
        );
        assert!(status_error(StatusCode::FORBIDDEN, "Channel").is_forbidden());
        assert_eq!(
            status_error(StatusCode::UNAUTHORIZED, "User").code(),
            "Unauthenticated"
        );
        assert_eq!(
            status_error(StatusCode::BAD_GATEWAY, "Channel").code(),
            "UpstreamUnavailable"
        );
    }

    #[test]
    fn test_webhook_body_references_files() {
        let payload = WebhookPayload {
            content: None,
            username: "Nelly".to_string(),
            avatar_url: "https://cdn.discordapp.com/embed/avatars/1.png".to_string(),
            files: vec![OutgoingFile {
                name: "cat.png".to_string(),
                content_type: Some("image/png".to_string()),
                data: vec![1, 2, 3],
            }],
        };
        let body = webhook_body(&payload);
        assert!(body["content"].is_null());
        assert_eq!(body["username"], "Nelly");
        assert_eq!(body["attachments"][0]["id"], 0);
        assert_eq!(body["attachments"][0]["filename"], "cat.png");
    }

    #[test]
    fn test_base_is_normalized() {
        let client = RestClient::with_base("t", "http://localhost:9999/api/").unwrap();
        assert_eq!(client.base, "http://localhost:9999/api");
    }
}
