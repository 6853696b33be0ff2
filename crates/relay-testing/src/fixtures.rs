//! Builders for inbound interactions and request fields.

use relay_core::{ContextIds, RequestDetails};
use serde_json::{json, Value};
use uuid::Uuid;

/// Builder for raw inbound interaction payloads.
#[derive(Debug, Clone)]
pub struct InteractionBuilder {
    kind: u64,
    token: Option<String>,
    application_id: Option<String>,
    user_id: Option<String>,
    username: String,
    roles: Vec<String>,
    guild_id: Option<String>,
    channel_id: Option<String>,
    prompt: Option<String>,
}

impl InteractionBuilder {
    /// A `chat` command with a unique token and a prompt.
    pub fn with_defaults() -> Self {
        Self {
            kind: 2,
            token: Some(format!("tok_{}", Uuid::new_v4().simple())),
            application_id: Some("app-test".to_string()),
            user_id: Some("user-1".to_string()),
            username: "tester".to_string(),
            roles: vec!["member".to_string()],
            guild_id: Some("guild-1".to_string()),
            channel_id: Some("channel-1".to_string()),
            prompt: Some("hello relay".to_string()),
        }
    }

    /// A ping interaction.
    pub fn ping() -> Self {
        Self { kind: 1, prompt: None, ..Self::with_defaults() }
    }

    /// Sets the interaction type code.
    #[must_use]
    pub fn kind(mut self, kind: u64) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the callback token.
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Removes the callback token.
    #[must_use]
    pub fn without_token(mut self) -> Self {
        self.token = None;
        self
    }

    /// Sets the application id.
    #[must_use]
    pub fn application(mut self, id: impl Into<String>) -> Self {
        self.application_id = Some(id.into());
        self
    }

    /// Sets the requester id.
    #[must_use]
    pub fn user(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    /// Sets the prompt option.
    #[must_use]
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Removes the prompt option.
    #[must_use]
    pub fn without_prompt(mut self) -> Self {
        self.prompt = None;
        self
    }

    /// Current callback token, if any.
    pub fn token_value(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Builds the JSON payload.
    pub fn build(&self) -> Value {
        let options: Vec<Value> = self
            .prompt
            .iter()
            .map(|p| json!({ "name": "prompt", "type": 3, "value": p }))
            .collect();

        let mut value = json!({
            "type": self.kind,
            "application_id": self.application_id,
            "guild_id": self.guild_id,
            "channel_id": self.channel_id,
            "member": {
                "user": { "id": self.user_id, "username": self.username },
                "roles": self.roles,
            },
            "data": { "name": "chat", "options": options },
        });
        if let Some(token) = &self.token {
            value["token"] = json!(token);
        }
        value
    }

    /// Builds the payload as bytes, as it would arrive over HTTP.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.build().to_string().into_bytes()
    }
}

/// Request fields with a unique token and the given payload.
pub fn request_details(payload: impl Into<String>) -> RequestDetails {
    RequestDetails {
        callback_token: format!("tok_{}", Uuid::new_v4().simple()),
        origin_id: "app-test".to_string(),
        requester_id: "user-1".to_string(),
        requester_display_name: "tester".to_string(),
        roles: vec!["member".to_string()],
        payload: payload.into(),
        context_ids: ContextIds {
            space_id: Some("guild-1".to_string()),
            subchannel_id: Some("channel-1".to_string()),
        },
    }
}
