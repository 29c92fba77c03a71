use cproxy_protocol::chat::stream::{
    ChatCompletionChunk, ChatCompletionChunkObjectType, ChatCompletionStreamChoice,
};
use cproxy_protocol::chat::types::{FinishReason, MessageDelta, Usage};
use cproxy_protocol::chat::upstream::{ChoicePayload, UpstreamCompletion};
use cproxy_protocol::sse::{DONE_SENTINEL, data_payload};

use crate::error::TranslateError;

const MAX_PAYLOAD_IN_ERROR: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslatorState {
    AwaitingLine,
    Done,
}

/// Result of feeding one line to the translator.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Nothing to emit: a non-`data:` line, an event without choices, or a
    /// line arriving after the stream finished.
    Skipped,
    /// The `[DONE]` sentinel was seen.
    Done,
    /// One chunk, or two when a content-bearing event also finished the choice.
    Chunks(Vec<ChatCompletionChunk>),
}

/// Re-emits upstream SSE events as OpenAI `chat.completion.chunk` objects.
///
/// One translator serves one request: every chunk it produces shares the id,
/// `created` timestamp and model it was built with.
#[derive(Debug, Clone)]
pub struct ChunkTranslator {
    id: String,
    created: i64,
    model: String,
    state: TranslatorState,
}

impl ChunkTranslator {
    pub fn new(id: impl Into<String>, created: i64, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created,
            model: model.into(),
            state: TranslatorState::AwaitingLine,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created(&self) -> i64 {
        self.created
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn state(&self) -> TranslatorState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == TranslatorState::Done
    }

    /// Feeds one raw SSE line.
    ///
    /// A payload that is not valid JSON moves the translator to `Done` and
    /// returns [`TranslateError::MalformedChunk`]; the stream must not continue.
    pub fn push_line(&mut self, line: &str) -> Result<LineOutcome, TranslateError> {
        if self.is_done() {
            return Ok(LineOutcome::Skipped);
        }
        let Some(payload) = data_payload(line) else {
            return Ok(LineOutcome::Skipped);
        };
        if payload == DONE_SENTINEL {
            self.state = TranslatorState::Done;
            return Ok(LineOutcome::Done);
        }

        let event: UpstreamCompletion = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(source) => {
                self.state = TranslatorState::Done;
                return Err(TranslateError::MalformedChunk {
                    payload: truncate(payload),
                    source,
                });
            }
        };

        let chunks = self.translate_event(event);
        if chunks.is_empty() {
            Ok(LineOutcome::Skipped)
        } else {
            Ok(LineOutcome::Chunks(chunks))
        }
    }

    /// Converts one decoded upstream event. Only the first choice is kept.
    pub fn translate_event(&self, event: UpstreamCompletion) -> Vec<ChatCompletionChunk> {
        let usage = event.usage.filter(|usage| !usage.is_empty());
        let Some(choice) = event.choices.into_iter().next() else {
            return Vec::new();
        };
        let index = choice.index;
        let delta = choice
            .payload()
            .map(ChoicePayload::into_delta)
            .unwrap_or_default();

        match choice.finish_reason {
            Some(reason) if delta.has_content() => vec![
                self.chunk(index, delta, None, None),
                self.chunk(index, MessageDelta::default(), Some(reason), usage),
            ],
            finish_reason => vec![self.chunk(index, delta, finish_reason, usage)],
        }
    }

    fn chunk(
        &self,
        index: i64,
        delta: MessageDelta,
        finish_reason: Option<FinishReason>,
        usage: Option<Usage>,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: ChatCompletionChunkObjectType::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatCompletionStreamChoice {
                index,
                delta,
                finish_reason,
            }],
            usage: usage.map(Usage::normalized),
        }
    }
}

fn truncate(payload: &str) -> String {
    if payload.len() <= MAX_PAYLOAD_IN_ERROR {
        return payload.to_string();
    }
    let mut end = MAX_PAYLOAD_IN_ERROR;
    while !payload.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &payload[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use cproxy_protocol::chat::types::Role;

    fn translator() -> ChunkTranslator {
        ChunkTranslator::new("chatcmpl-test", 1_700_000_000, "gpt-4o")
    }

    fn chunks(outcome: LineOutcome) -> Vec<ChatCompletionChunk> {
        match outcome {
            LineOutcome::Chunks(chunks) => chunks,
            other => panic!("expected chunks, got {other:?}"),
        }
    }

    #[test]
    fn content_with_finish_reason_is_split_in_order() {
        let mut t = translator();
        let out = chunks(
            t.push_line(
                r#"data: {"choices":[{"index":0,"delta":{"role":"assistant","content":"Hello"},"finish_reason":"stop"}]}"#,
            )
            .unwrap(),
        );
        assert_eq!(out.len(), 2);

        let content = &out[0].choices[0];
        assert_eq!(content.delta.content.as_deref(), Some("Hello"));
        assert_eq!(content.delta.role, Some(Role::Assistant));
        assert_eq!(content.finish_reason, None);

        let finish = &out[1].choices[0];
        assert_eq!(finish.delta, MessageDelta::default());
        assert_eq!(finish.finish_reason, Some(FinishReason::Stop));

        for chunk in &out {
            assert_eq!(chunk.id, "chatcmpl-test");
            assert_eq!(chunk.created, 1_700_000_000);
            assert_eq!(chunk.model, "gpt-4o");
        }
    }

    #[test]
    fn content_only_event_is_passed_through() {
        let mut t = translator();
        let out = chunks(
            t.push_line(r#"data: {"choices":[{"index":0,"delta":{"content":"Hel"}}]}"#)
                .unwrap(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].choices[0].delta, MessageDelta::content("Hel"));
        assert_eq!(out[0].choices[0].finish_reason, None);
    }

    #[test]
    fn finish_only_event_is_passed_through() {
        let mut t = translator();
        let out = chunks(
            t.push_line(r#"data: {"choices":[{"index":0,"delta":{"content":""},"finish_reason":"length"}]}"#)
                .unwrap(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].choices[0].finish_reason, Some(FinishReason::Length));
        assert_eq!(out[0].choices[0].delta.content.as_deref(), Some(""));
    }

    #[test]
    fn non_data_lines_are_ignored() {
        let mut t = translator();
        for line in ["", ": keep-alive", "event: message", "id: 7"] {
            assert_eq!(t.push_line(line).unwrap(), LineOutcome::Skipped);
        }
        assert_eq!(t.state(), TranslatorState::AwaitingLine);
    }

    #[test]
    fn done_sentinel_terminates() {
        let mut t = translator();
        assert_eq!(t.push_line("data: [DONE]").unwrap(), LineOutcome::Done);
        assert!(t.is_done());
        assert_eq!(
            t.push_line(r#"data: {"choices":[{"delta":{"content":"late"}}]}"#)
                .unwrap(),
            LineOutcome::Skipped
        );
    }

    #[test]
    fn unrecognized_role_does_not_abort_the_stream() {
        let mut t = translator();
        let out = chunks(
            t.push_line(r#"data: {"choices":[{"delta":{"role":"narrator","content":"Once"}}]}"#)
                .unwrap(),
        );
        assert_eq!(out[0].choices[0].delta.role, Some(Role::Other("narrator".to_string())));
        assert_eq!(out[0].choices[0].delta.text(), "Once");
        assert!(!t.is_done());
    }

    #[test]
    fn empty_choices_are_keepalives() {
        let mut t = translator();
        assert_eq!(
            t.push_line(r#"data: {"choices":[],"prompt_filter_results":[]}"#)
                .unwrap(),
            LineOutcome::Skipped
        );
        assert!(!t.is_done());
    }

    #[test]
    fn malformed_payload_aborts() {
        let mut t = translator();
        let err = t.push_line("data: {not json").unwrap_err();
        assert!(matches!(err, TranslateError::MalformedChunk { ref payload, .. } if payload == "{not json"));
        assert!(t.is_done());
        assert_eq!(
            t.push_line(r#"data: {"choices":[{"delta":{"content":"x"}}]}"#)
                .unwrap(),
            LineOutcome::Skipped
        );
    }

    #[test]
    fn first_choice_only_and_index_kept() {
        let t = translator();
        let event: UpstreamCompletion = serde_json::from_str(
            r#"{"choices":[{"index":3,"delta":{"content":"a"}},{"index":4,"delta":{"content":"b"}}]}"#,
        )
        .unwrap();
        let out = t.translate_event(event);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].choices.len(), 1);
        assert_eq!(out[0].choices[0].index, 3);
    }

    #[test]
    fn usage_rides_on_last_chunk() {
        let t = translator();
        let event: UpstreamCompletion = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"bye"},"finish_reason":"stop"}],"usage":{"prompt_tokens":5,"completion_tokens":2,"total_tokens":7}}"#,
        )
        .unwrap();
        let out = t.translate_event(event);
        assert_eq!(out[0].usage, None);
        assert_eq!(out[1].usage, Some(Usage::new(5, 2)));
    }

    #[test]
    fn long_payload_is_truncated_in_error() {
        let payload = "é".repeat(200);
        let truncated = truncate(&payload);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= MAX_PAYLOAD_IN_ERROR + 3);
    }
}
