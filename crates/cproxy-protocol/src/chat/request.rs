use serde::{Deserialize, Serialize};

use crate::chat::types::{Message, is_false};

/// Body accepted on the gateway chat routes. Every field but `messages` is
/// optional and falls back to the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequestBody {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

/// Body sent to the upstream completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub stream: bool,
    pub temperature: f64,
    pub top_p: f64,
    pub n: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::Role;

    #[test]
    fn body_without_optional_fields() {
        let body: ChatRequestBody =
            serde_json::from_str(r#"{"messages":[{"role":"user","content":"Hi"}]}"#).unwrap();
        assert_eq!(body.messages, vec![Message::new(Role::User, "Hi")]);
        assert_eq!(body.model, None);
        assert_eq!(body.stream, None);
    }

    #[test]
    fn body_without_messages_is_empty_conversation() {
        let body: ChatRequestBody = serde_json::from_str(r#"{"stream":true}"#).unwrap();
        assert!(body.messages.is_empty());
        assert_eq!(body.stream, Some(true));
    }

    #[test]
    fn stream_flag_omitted_when_false() {
        let request = CompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![Message::new(Role::System, "be brief")],
            stream: false,
            temperature: 0.3,
            top_p: 0.9,
            n: 1,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("stream").is_none());
        assert_eq!(value["top_p"], 0.9);

        let streaming = CompletionRequest {
            stream: true,
            ..request
        };
        assert_eq!(serde_json::to_value(&streaming).unwrap()["stream"], true);
    }
}
