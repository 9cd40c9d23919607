pub mod rtm;
pub mod web_api;

use serde::Deserialize;
use serde_json::Value;

/// A channel as returned by `channels.list`
#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemberProfile {
    #[serde(default)]
    pub real_name: Option<String>,
}

/// A user as returned by `users.list` or `users.info`
#[derive(Debug, Clone, Deserialize)]
pub struct Member {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub profile: Option<MemberProfile>,
}

impl Member {
    /// `profile.real_name` wins over the top-level field, as in `users.list`.
    pub fn real_name(&self) -> String {
        self.profile
            .as_ref()
            .and_then(|p| p.real_name.clone())
            .or_else(|| self.real_name.clone())
            .unwrap_or_default()
    }
}

/// A newly posted plain message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub channel: String,
    pub user: String,
    pub text: String,
}

/// One decoded frame from the RTM stream
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// The platform answered with `ok: false`.
    Rejected(Value),
    Message(NewMessage),
    /// Anything else, including messages with a subtype (edits, joins, bot posts).
    Other {
        kind: Option<String>,
        subtype: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: Option<String>,
    subtype: Option<String>,
    ok: Option<bool>,
    // Not every event carries these as strings (`channel_created`, `user_change`).
    channel: Option<Value>,
    user: Option<Value>,
    text: Option<Value>,
}

fn as_string(value: Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

impl ChatEvent {
    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(frame)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let raw = RawEvent::deserialize(&value)?;

        if raw.ok == Some(false) {
            return Ok(ChatEvent::Rejected(value));
        }

        if raw.kind.as_deref() == Some("message") && raw.subtype.is_none() {
            if let (Some(channel), Some(user), Some(text)) = (
                as_string(raw.channel),
                as_string(raw.user),
                as_string(raw.text),
            ) {
                return Ok(ChatEvent::Message(NewMessage {
                    channel,
                    user,
                    text,
                }));
            }
            return Ok(ChatEvent::Other {
                kind: raw.kind,
                subtype: None,
            });
        }

        Ok(ChatEvent::Other {
            kind: raw.kind,
            subtype: raw.subtype,
        })
    }
}
