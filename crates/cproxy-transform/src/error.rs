#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    /// A `data:` payload in the stream was not a completion chunk.
    #[error("malformed stream chunk `{payload}`: {source}")]
    MalformedChunk {
        payload: String,
        #[source]
        source: serde_json::Error,
    },
    /// The buffered (non-streaming) body was not a completion object.
    #[error("malformed completion body: {0}")]
    MalformedBody(#[source] serde_json::Error),
    #[error("no choices in completion response")]
    EmptyChoices,
}
