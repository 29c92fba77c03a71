//! Copilot → OpenAI response translation.
//!
//! Pure and IO-free: callers feed SSE lines or a buffered body and get
//! OpenAI-shaped completion objects back.

mod aggregate;
mod chunk;
mod error;
mod usage;

pub use aggregate::{CompletionContext, aggregate_completion};
pub use chunk::{ChunkTranslator, LineOutcome, TranslatorState};
pub use error::TranslateError;
pub use usage::{CHARS_PER_TOKEN, estimate_usage};
