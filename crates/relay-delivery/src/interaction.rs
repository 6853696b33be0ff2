//! Parsing of raw inbound interaction payloads.
//!
//! The submission boundary is the only place untyped JSON is accepted. It is
//! turned into [`RequestDetails`] here, so nothing downstream ever looks up a
//! field by name.

use relay_core::{ContextIds, RequestDetails};
use serde::Deserialize;
use serde_json::Value;

use crate::error::SubmitError;

/// Name of the command option carrying the text to process.
pub const PROMPT_OPTION: &str = "prompt";

const UNKNOWN_DISPLAY_NAME: &str = "Unknown";

/// Interaction type codes the relay understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    /// Endpoint liveness check.
    Ping,
    /// Slash command invocation.
    Command,
    /// Anything else.
    Other(u64),
}

impl From<u64> for InteractionKind {
    fn from(code: u64) -> Self {
        match code {
            1 => Self::Ping,
            2 => Self::Command,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawUser {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    global_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMember {
    #[serde(default)]
    user: Option<RawUser>,
    #[serde(default)]
    nick: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawOption {
    name: String,
    #[serde(default)]
    value: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCommand {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    options: Vec<RawOption>,
}

/// An inbound interaction, parsed leniently.
///
/// Optional fields stay optional here; [`RawInteraction::into_details`]
/// decides what is required.
#[derive(Debug, Default, Deserialize)]
pub struct RawInteraction {
    #[serde(rename = "type", default)]
    kind: u64,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    application_id: Option<Value>,
    #[serde(default)]
    guild_id: Option<Value>,
    #[serde(default)]
    channel_id: Option<Value>,
    #[serde(default)]
    member: Option<RawMember>,
    #[serde(default)]
    user: Option<RawUser>,
    #[serde(default)]
    data: Option<RawCommand>,
}

/// Snowflake ids arrive as strings or numbers depending on the sender.
fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl RawInteraction {
    /// Parses a JSON value.
    ///
    /// # Errors
    ///
    /// Returns `SubmitError::Malformed` if the value is not an object of the
    /// expected shape.
    pub fn from_value(value: &Value) -> Result<Self, SubmitError> {
        Self::deserialize(value).map_err(|e| SubmitError::malformed(e.to_string()))
    }

    /// Interaction type.
    pub fn kind(&self) -> InteractionKind {
        InteractionKind::from(self.kind)
    }

    /// Invoked command name, if any.
    pub fn command_name(&self) -> Option<&str> {
        self.data.as_ref()?.name.as_deref()
    }

    /// The `prompt` option, if present and non-empty.
    pub fn prompt(&self) -> Option<String> {
        let option = self.data.as_ref()?.options.iter().find(|o| o.name == PROMPT_OPTION)?;
        match option.value.as_ref()? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    fn user(&self) -> Option<&RawUser> {
        self.member.as_ref().and_then(|m| m.user.as_ref()).or(self.user.as_ref())
    }

    /// Converts into request fields, using `payload` as the text to process.
    ///
    /// # Errors
    ///
    /// Returns `SubmitError::Malformed` naming the first missing field among
    /// token, application id and user id.
    pub fn into_details(self, payload: String) -> Result<RequestDetails, SubmitError> {
        let callback_token = self
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| SubmitError::malformed("missing token"))?;
        let origin_id = id_string(self.application_id.as_ref())
            .ok_or_else(|| SubmitError::malformed("missing application_id"))?;

        let user = self.user();
        let requester_id = id_string(user.and_then(|u| u.id.as_ref()))
            .ok_or_else(|| SubmitError::malformed("missing user id"))?;
        let requester_display_name = self
            .member
            .as_ref()
            .and_then(|m| m.nick.clone())
            .or_else(|| user.and_then(|u| u.global_name.clone()))
            .or_else(|| user.and_then(|u| u.username.clone()))
            .unwrap_or_else(|| UNKNOWN_DISPLAY_NAME.to_string());
        let roles = self.member.as_ref().map(|m| m.roles.clone()).unwrap_or_default();

        Ok(RequestDetails {
            callback_token,
            origin_id,
            requester_id,
            requester_display_name,
            roles,
            payload,
            context_ids: ContextIds {
                space_id: id_string(self.guild_id.as_ref()),
                subchannel_id: id_string(self.channel_id.as_ref()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn command(prompt: Value) -> Value {
        json!({
            "type": 2,
            "token": "tok-123",
            "application_id": "app-1",
            "guild_id": "g-1",
            "channel_id": 42,
            "member": {
                "user": { "id": "u-1", "username": "ada" },
                "roles": ["r1", "r2"]
            },
            "data": { "name": "chat", "options": [{ "name": "prompt", "value": prompt }] }
        })
    }

    #[test]
    fn parses_guild_command() {
        let raw = RawInteraction::from_value(&command(json!("hello"))).unwrap();
        assert_eq!(raw.kind(), InteractionKind::Command);
        assert_eq!(raw.command_name(), Some("chat"));
        assert_eq!(raw.prompt().as_deref(), Some("hello"));

        let details = raw.into_details("hello".to_string()).unwrap();
        assert_eq!(details.callback_token, "tok-123");
        assert_eq!(details.origin_id, "app-1");
        assert_eq!(details.requester_id, "u-1");
        assert_eq!(details.requester_display_name, "ada");
        assert_eq!(details.roles, vec!["r1", "r2"]);
        assert_eq!(details.context_ids.space_id.as_deref(), Some("g-1"));
        assert_eq!(details.context_ids.subchannel_id.as_deref(), Some("42"));
    }

    #[test]
    fn blank_prompt_is_absent() {
        let raw = RawInteraction::from_value(&command(json!("   "))).unwrap();
        assert!(raw.prompt().is_none());
        let raw = RawInteraction::from_value(&command(json!(5))).unwrap();
        assert!(raw.prompt().is_none());
    }

    #[test]
    fn direct_message_uses_top_level_user() {
        let value = json!({
            "type": 2,
            "token": "tok",
            "application_id": 99,
            "user": { "id": "u-9", "global_name": "Grace" }
        });
        let details =
            RawInteraction::from_value(&value).unwrap().into_details("x".to_string()).unwrap();
        assert_eq!(details.origin_id, "99");
        assert_eq!(details.requester_display_name, "Grace");
        assert!(details.roles.is_empty());
        assert_eq!(details.context_ids, ContextIds::default());
    }

    #[test]
    fn missing_fields_are_malformed() {
        let mut value = command(json!("hi"));
        value["token"] = Value::Null;
        let err = RawInteraction::from_value(&value)
            .unwrap()
            .into_details("hi".to_string())
            .unwrap_err();
        assert_eq!(err, SubmitError::malformed("missing token"));

        let mut value = command(json!("hi"));
        value["member"]["user"] = Value::Null;
        let err = RawInteraction::from_value(&value)
            .unwrap()
            .into_details("hi".to_string())
            .unwrap_err();
        assert_eq!(err, SubmitError::malformed("missing user id"));
    }

    #[test]
    fn ping_and_unknown_kinds() {
        let raw = RawInteraction::from_value(&json!({ "type": 1 })).unwrap();
        assert_eq!(raw.kind(), InteractionKind::Ping);
        let raw = RawInteraction::from_value(&json!({ "type": 3 })).unwrap();
        assert_eq!(raw.kind(), InteractionKind::Other(3));
        assert!(RawInteraction::from_value(&json!("not an object")).is_err());
    }
}
