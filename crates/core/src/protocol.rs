//! Real-time frame format.
//!
//! Client frames are `{"event": ..., "data": {...}, "ack": n}`. Server push
//! frames are `{"event": ..., "data": {...}}`; replies to a client frame that
//! carried an `ack` are `{"event": "ack", "ack": n, "data": {...}}`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AckError, RelayError, RelayResult};
use crate::types::{Attachment, Embed, OutgoingFile};

pub const MAX_FILES: usize = 10;
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub ack: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRef {
    pub channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    pub name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Standard base64.
    pub data: String,
}

impl FilePayload {
    pub fn decode(&self, max_bytes: usize) -> RelayResult<OutgoingFile> {
        // base64 inflates by 4/3; reject before decoding
        if self.data.len() / 4 * 3 > max_bytes + 3 {
            return Err(RelayError::InvalidRequest(format!(
                "{} exceeds the upload limit",
                self.name
            )));
        }
        let data = STANDARD
            .decode(self.data.as_bytes())
            .map_err(|_| RelayError::InvalidRequest(format!("{} is not valid base64", self.name)))?;
        if data.len() > max_bytes {
            return Err(RelayError::InvalidRequest(format!(
                "{} exceeds the upload limit",
                self.name
            )));
        }
        Ok(OutgoingFile {
            name: self.name.clone(),
            content_type: self.content_type.clone(),
            data,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub files: Vec<FilePayload>,
    #[serde(default)]
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthRequest {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Auth(AuthRequest),
    Join(ChannelRef),
    Leave(ChannelRef),
    Send(SendRequest),
    Typing(ChannelRef),
}

impl ClientEvent {
    pub fn from_frame(frame: &ClientFrame) -> RelayResult<Self> {
        fn data<T: serde::de::DeserializeOwned>(value: &Value) -> RelayResult<T> {
            T::deserialize(value).map_err(|err| RelayError::InvalidRequest(err.to_string()))
        }

        match frame.event.as_str() {
            "auth" => Ok(ClientEvent::Auth(data(&frame.data)?)),
            "channel:join" => Ok(ClientEvent::Join(data(&frame.data)?)),
            "channel:leave" => Ok(ClientEvent::Leave(data(&frame.data)?)),
            "message:send" => Ok(ClientEvent::Send(data(&frame.data)?)),
            "typing:start" => Ok(ClientEvent::Typing(data(&frame.data)?)),
            other => Err(RelayError::InvalidRequest(format!("unknown event {other}"))),
        }
    }
}

/// Canonical wire shape of a chat message.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RelayMessage {
    pub id: String,
    pub channel_id: String,
    pub guild_id: String,
    pub author_id: String,
    pub author_username: String,
    /// Avatar hash, not a URL.
    pub author_avatar: Option<String>,
    pub author_bot: bool,
    pub author_color: Option<String>,
    pub global_name: Option<String>,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub embeds: Vec<Embed>,
    pub reference_id: Option<String>,
    /// Milliseconds since the epoch.
    pub edited_at: Option<i64>,
    pub created_at: i64,
    pub is_webhook: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub channel_id: String,
    pub user_id: String,
    pub username: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "message:create")]
    MessageCreate(RelayMessage),
    #[serde(rename = "message:update")]
    MessageUpdate(RelayMessage),
    #[serde(rename = "message:delete", rename_all = "camelCase")]
    MessageDelete { id: String, channel_id: String },
    #[serde(rename = "typing:start")]
    TypingStart(TypingNotice),
    #[serde(rename = "auth:ok", rename_all = "camelCase")]
    AuthOk { user_id: String },
    #[serde(rename = "auth:error")]
    AuthError { message: String },
}

impl ServerEvent {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Serialize)]
struct AckFrame<'a> {
    event: &'static str,
    ack: u64,
    data: &'a Value,
}

/// Builds the reply to a client frame. Success payloads are objects that get
/// `"success": true` merged in.
pub fn ack_frame(ack: u64, result: &Result<Value, AckError>) -> serde_json::Result<String> {
    let data = match result {
        Ok(Value::Object(fields)) => {
            let mut fields = fields.clone();
            fields.insert("success".to_string(), Value::Bool(true));
            Value::Object(fields)
        }
        Ok(_) => serde_json::json!({ "success": true }),
        Err(err) => serde_json::to_value(err)?,
    };
    serde_json::to_string(&AckFrame {
        event: "ack",
        ack,
        data: &data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(raw: &str) -> ClientFrame {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_parse_join_with_ack() {
        let f = frame(r#"{"event":"channel:join","data":{"channelId":"c1"},"ack":7}"#);
        assert_eq!(f.ack, Some(7));
        assert_eq!(
            ClientEvent::from_frame(&f).unwrap(),
            ClientEvent::Join(ChannelRef {
                channel_id: "c1".to_string()
            })
        );
    }

    #[test]
    fn test_parse_send_defaults() {
        let f = frame(r#"{"event":"message:send","data":{"channelId":"c1"}}"#);
        let ClientEvent::Send(req) = ClientEvent::from_frame(&f).unwrap() else {
            panic!("expected send");
        };
        assert_eq!(req.content, "");
        assert!(req.files.is_empty());
        assert!(req.reply_to.is_none());
        assert!(f.ack.is_none());
    }

    #[test]
    fn test_unknown_event_rejected() {
        let f = frame(r#"{"event":"voice:join","data":{}}"#);
        let err = ClientEvent::from_frame(&f).unwrap_err();
        assert_eq!(err.code(), "InvalidRequest");
    }

    #[test]
    fn test_missing_channel_id_rejected() {
        let f = frame(r#"{"event":"channel:join","data":{}}"#);
        assert!(matches!(
            ClientEvent::from_frame(&f),
            Err(RelayError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_file_payload_decode_and_limit() {
        let file = FilePayload {
            name: "a.txt".to_string(),
            content_type: Some("text/plain".to_string()),
            data: STANDARD.encode(b"hello"),
        };
        assert_eq!(file.decode(16).unwrap().data, b"hello");
        assert!(file.decode(4).is_err());

        let bad = FilePayload {
            name: "b.bin".to_string(),
            content_type: None,
            data: "!!not base64!!".to_string(),
        };
        assert!(bad.decode(1024).is_err());
    }

    #[test]
    fn test_server_event_shapes() {
        let delete = ServerEvent::MessageDelete {
            id: "m1".to_string(),
            channel_id: "c1".to_string(),
        };
        let value: Value = serde_json::from_str(&delete.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "message:delete", "data": {"id": "m1", "channelId": "c1"}})
        );

        let typing = ServerEvent::TypingStart(TypingNotice {
            channel_id: "c1".to_string(),
            user_id: "u1".to_string(),
            username: "nelly".to_string(),
            avatar: None,
        });
        let value: Value = serde_json::from_str(&typing.encode().unwrap()).unwrap();
        assert_eq!(value["event"], "typing:start");
        assert_eq!(value["data"]["userId"], "u1");
        assert!(value["data"]["avatar"].is_null());
    }

    #[test]
    fn test_ack_success_merges_flag() {
        let raw = ack_frame(3, &Ok(json!({"messageId": "m9"}))).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            value,
            json!({"event": "ack", "ack": 3, "data": {"success": true, "messageId": "m9"}})
        );
    }

    #[test]
    fn test_ack_error_carries_code() {
        let raw = ack_frame(4, &Err(RelayError::RateLimited.to_ack())).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["data"]["error"], "Too many requests");
        assert_eq!(value["data"]["code"], "RateLimited");
        assert!(value["data"].get("success").is_none());
    }
}
