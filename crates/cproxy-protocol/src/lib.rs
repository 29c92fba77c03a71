//! Wire types spoken by the gateway: the OpenAI-shaped chat completion objects
//! on both sides of the proxy, the GitHub device-flow/session payloads, and a
//! line-oriented SSE decoder.

pub mod chat;
pub mod error;
pub mod github;
pub mod sse;
