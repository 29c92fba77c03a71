use serde::{Deserialize, Serialize};

use crate::chat::types::{FinishReason, MessageDelta, Usage, empty_finish_reason_as_none};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatCompletionChunkObjectType {
    #[serde(rename = "chat.completion.chunk")]
    ChatCompletionChunk,
}

/// A streaming choice. Always carries a `delta`; `finish_reason` is `null`
/// until the final chunk of the choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionStreamChoice {
    pub index: i64,
    pub delta: MessageDelta,
    #[serde(default, deserialize_with = "empty_finish_reason_as_none")]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: ChatCompletionChunkObjectType,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatCompletionStreamChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_chunk_serializes_null_finish_reason() {
        let chunk = ChatCompletionChunk {
            id: "chatcmpl-1".to_string(),
            object: ChatCompletionChunkObjectType::ChatCompletionChunk,
            created: 1_700_000_000,
            model: "gpt-4o".to_string(),
            choices: vec![ChatCompletionStreamChoice {
                index: 0,
                delta: MessageDelta::content("Hel"),
                finish_reason: None,
            }],
            usage: None,
        };
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["object"], "chat.completion.chunk");
        assert_eq!(value["choices"][0]["delta"]["content"], "Hel");
        assert!(value["choices"][0]["finish_reason"].is_null());
        assert!(value.get("usage").is_none());
    }
}
