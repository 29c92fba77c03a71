use cproxy_protocol::chat::response::{
    ChatCompletion, ChatCompletionChoice, ChatCompletionObjectType,
};
use cproxy_protocol::chat::types::{FinishReason, Message};
use cproxy_protocol::chat::upstream::UpstreamCompletion;

use crate::error::TranslateError;
use crate::usage::estimate_usage;

/// Per-request identity stamped onto the aggregated completion.
#[derive(Debug, Clone, Copy)]
pub struct CompletionContext<'a> {
    pub id: &'a str,
    pub created: i64,
    pub model: &'a str,
    /// Conversation sent upstream, used for the usage estimate.
    pub messages: &'a [Message],
}

/// Builds a single `chat.completion` object from a buffered upstream body.
///
/// The text of the first choice becomes the assistant message and the finish
/// reason is always `stop`. Upstream usage is kept when it has any non-zero
/// field; otherwise it is estimated.
pub fn aggregate_completion(
    body: &[u8],
    ctx: CompletionContext<'_>,
) -> Result<ChatCompletion, TranslateError> {
    let upstream: UpstreamCompletion =
        serde_json::from_slice(body).map_err(TranslateError::MalformedBody)?;

    let choice = upstream
        .choices
        .first()
        .ok_or(TranslateError::EmptyChoices)?;
    let text = choice
        .payload()
        .map(|payload| payload.text().to_string())
        .unwrap_or_default();

    let usage = match upstream.usage {
        Some(usage) if !usage.is_empty() => usage.normalized(),
        _ => estimate_usage(ctx.messages, &text),
    };

    Ok(ChatCompletion {
        id: ctx.id.to_string(),
        object: ChatCompletionObjectType::ChatCompletion,
        created: ctx.created,
        model: ctx.model.to_string(),
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: Message::assistant(text),
            finish_reason: FinishReason::Stop,
        }],
        usage: Some(usage),
    })
}
