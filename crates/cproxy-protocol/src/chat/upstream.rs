//! Lenient view of what the Copilot completion endpoint returns.
//!
//! The same object shape is used for the buffered body and for every SSE
//! `data:` payload; only the populated half of each choice differs.

use serde::{Deserialize, Serialize};

use crate::chat::types::{FinishReason, Message, MessageDelta, Usage, empty_finish_reason_as_none};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamCompletion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default, deserialize_with = "null_as_empty_vec")]
    pub choices: Vec<UpstreamChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamChoice {
    #[serde(default)]
    pub index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<MessageDelta>,
    #[serde(
        default,
        deserialize_with = "empty_finish_reason_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub finish_reason: Option<FinishReason>,
}

/// Which half of an upstream choice is populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoicePayload {
    Finalized(Message),
    Partial(MessageDelta),
}

impl ChoicePayload {
    pub fn text(&self) -> &str {
        match self {
            ChoicePayload::Finalized(message) => &message.content,
            ChoicePayload::Partial(delta) => delta.text(),
        }
    }

    pub fn into_delta(self) -> MessageDelta {
        match self {
            ChoicePayload::Finalized(message) => MessageDelta::from(message),
            ChoicePayload::Partial(delta) => delta,
        }
    }
}

impl UpstreamChoice {
    /// Prefers `message` over `delta`; `None` when upstream sent neither.
    pub fn payload(&self) -> Option<ChoicePayload> {
        if let Some(message) = &self.message {
            return Some(ChoicePayload::Finalized(message.clone()));
        }
        self.delta.clone().map(ChoicePayload::Partial)
    }
}

fn null_as_empty_vec<'de, D>(deserializer: D) -> Result<Vec<UpstreamChoice>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<UpstreamChoice>>::deserialize(deserializer)?.unwrap_or_default())
}
