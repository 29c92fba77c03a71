use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use tracing::warn;

use cproxy_protocol::chat::stream::ChatCompletionChunk;
use cproxy_protocol::sse::{SseLineDecoder, SseLineTooLong};
use cproxy_transform::{ChunkTranslator, LineOutcome, TranslateError};

use crate::error::UpstreamError;
use crate::upstream_client::ByteStream;

/// `chatcmpl-<uuid v4>`.
pub fn new_completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4())
}

#[derive(Debug, thiserror::Error)]
pub enum ChunkStreamError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    LineTooLong(#[from] SseLineTooLong),
}

/// Failure reported by a per-chunk handler. Logged, never fatal to the stream.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Lazy sequence of translated chunks over an upstream SSE body.
///
/// Ends after `[DONE]`, after upstream EOF, or right after yielding the first
/// error. Dropping it drops the upstream response and closes the connection.
pub struct ChunkStream {
    id: String,
    created: i64,
    model: String,
    inner: Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk, ChunkStreamError>> + Send>>,
}

struct StreamState {
    bytes: ByteStream,
    decoder: SseLineDecoder,
    translator: ChunkTranslator,
    pending: VecDeque<ChatCompletionChunk>,
    failure: Option<ChunkStreamError>,
    finished: bool,
}

impl StreamState {
    fn feed(&mut self, lines: Vec<String>) {
        for line in lines {
            match self.translator.push_line(&line) {
                Ok(LineOutcome::Skipped) => {}
                Ok(LineOutcome::Done) => {
                    self.finished = true;
                    return;
                }
                Ok(LineOutcome::Chunks(chunks)) => self.pending.extend(chunks),
                Err(err) => {
                    self.fail(err.into());
                    return;
                }
            }
        }
    }

    fn fail(&mut self, err: ChunkStreamError) {
        self.failure = Some(err);
        self.finished = true;
    }

    async fn next_item(&mut self) -> Option<Result<ChatCompletionChunk, ChunkStreamError>> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(Ok(chunk));
            }
            if let Some(err) = self.failure.take() {
                return Some(Err(err));
            }
            if self.finished {
                return None;
            }
            match self.bytes.next().await {
                Some(Ok(bytes)) => {
                    let mut lines = Vec::new();
                    let decoded = self.decoder.push_bytes(&bytes, &mut lines);
                    self.feed(lines);
                    match decoded {
                        Err(err) if !self.finished => self.fail(err.into()),
                        _ => {}
                    }
                }
                Some(Err(err)) => self.fail(err.into()),
                None => {
                    let tail = self.decoder.finish();
                    self.feed(tail.into_iter().collect());
                    self.finished = true;
                }
            }
        }
    }
}

impl ChunkStream {
    pub fn new(bytes: ByteStream, translator: ChunkTranslator) -> Self {
        let id = translator.id().to_string();
        let created = translator.created();
        let model = translator.model().to_string();
        let state = StreamState {
            bytes,
            decoder: SseLineDecoder::new(),
            translator,
            pending: VecDeque::new(),
            failure: None,
            finished: false,
        };
        let inner = futures_util::stream::unfold(state, |mut state| async move {
            let item = state.next_item().await?;
            Some((item, state))
        });
        Self {
            id,
            created,
            model,
            inner: Box::pin(inner),
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
}

impl Stream for ChunkStream {
    type Item = Result<ChatCompletionChunk, ChunkStreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}

/// Drives `stream` to the end, handing every chunk to `handler`.
///
/// Handler failures are logged and skipped. The first stream error ends the
/// loop and is returned. On success, returns the number of chunks delivered.
pub async fn for_each_chunk<F>(mut stream: ChunkStream, mut handler: F) -> Result<usize, ChunkStreamError>
where
    F: FnMut(ChatCompletionChunk) -> Result<(), HandlerError>,
{
    let mut delivered = 0;
    while let Some(item) = stream.next().await {
        let chunk = item?;
        delivered += 1;
        if let Err(err) = handler(chunk) {
            warn!(
                event = "chunk_handler_failed",
                completion_id = %stream.id(),
                error = %err
            );
        }
    }
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use cproxy_protocol::chat::types::FinishReason;

    fn byte_stream(parts: Vec<Result<&'static str, UpstreamError>>) -> ByteStream {
        let items: Vec<Result<Bytes, UpstreamError>> = parts
            .into_iter()
            .map(|part| part.map(|text| Bytes::from_static(text.as_bytes())))
            .collect();
        Box::pin(futures_util::stream::iter(items))
    }

    fn stream(parts: Vec<Result<&'static str, UpstreamError>>) -> ChunkStream {
        ChunkStream::new(
            byte_stream(parts),
            ChunkTranslator::new("chatcmpl-1", 10, "gpt-4o"),
        )
    }

    async fn collect(stream: ChunkStream) -> Vec<Result<ChatCompletionChunk, ChunkStreamError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn splits_lines_across_network_chunks() {
        let items = collect(stream(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"He"),
            Ok("llo\"},\"finish_reason\":\"stop\"}]}\n\n"),
            Ok("data: [DONE]\n\n"),
        ]))
        .await;
        assert_eq!(items.len(), 2);
        let first = items[0].as_ref().unwrap();
        let second = items[1].as_ref().unwrap();
        assert_eq!(first.choices[0].delta.text(), "Hello");
        assert_eq!(second.choices[0].finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn stops_reading_after_done() {
        let items = collect(stream(vec![
            Ok("data: [DONE]\n\n"),
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n"),
        ]))
        .await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn malformed_line_ends_stream_after_earlier_chunks() {
        let items = collect(stream(vec![Ok(
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: {broken\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n\n",
        )]))
        .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().choices[0].delta.text(), "ok");
        assert!(matches!(
            items[1],
            Err(ChunkStreamError::Translate(TranslateError::MalformedChunk { .. }))
        ));
    }

    #[tokio::test]
    async fn upstream_error_ends_stream() {
        let items = collect(stream(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n"),
            Err(UpstreamError::Status { status: 500 }),
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n"),
        ]))
        .await;
        assert_eq!(items.len(), 2);
        assert!(matches!(
            items[1],
            Err(ChunkStreamError::Upstream(UpstreamError::Status { status: 500 }))
        ));
    }

    #[tokio::test]
    async fn oversized_line_ends_stream() {
        let huge: &'static str = Box::leak("x".repeat(2 << 20).into_boxed_str());
        let items = collect(stream(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\ndata: "),
            Ok(huge),
            Ok("\n\ndata: [DONE]\n\n"),
        ]))
        .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().choices[0].delta.text(), "a");
        assert!(matches!(items[1], Err(ChunkStreamError::LineTooLong(_))));
    }

    #[tokio::test]
    async fn flushes_unterminated_last_line() {
        let items = collect(stream(vec![Ok(
            "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}",
        )]))
        .await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().choices[0].delta.text(), "tail");
    }

    #[tokio::test]
    async fn handler_errors_do_not_abort() {
        let s = stream(vec![Ok(
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\ndata: [DONE]\n\n",
        )]);
        let mut seen = Vec::new();
        let delivered = for_each_chunk(s, |chunk| {
            seen.push(chunk.choices[0].delta.text().to_string());
            Err(HandlerError::new("sink closed"))
        })
        .await
        .unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn completion_ids_are_unique() {
        let a = new_completion_id();
        let b = new_completion_id();
        assert!(a.starts_with("chatcmpl-"));
        assert_ne!(a, b);
    }
}
