use cproxy_protocol::chat::types::{Message, Usage};

/// Coarse conversion used when upstream omits usage.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimates usage from the serialized conversation and the response text.
pub fn estimate_usage(messages: &[Message], completion: &str) -> Usage {
    let prompt_len = serde_json::to_string(messages)
        .map(|serialized| serialized.len())
        .unwrap_or_default();
    Usage::new(
        (prompt_len / CHARS_PER_TOKEN) as u64,
        (completion.len() / CHARS_PER_TOKEN) as u64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use cproxy_protocol::chat::types::Role;

    #[test]
    fn four_chars_per_token() {
        // [{"role":"user","content":"Hi"}] is 32 bytes.
        let messages = vec![Message::new(Role::User, "Hi")];
        let usage = estimate_usage(&messages, "Hello there!");
        assert_eq!(usage.prompt_tokens, 8);
        assert_eq!(usage.completion_tokens, 3);
        assert_eq!(usage.total_tokens, 11);
    }

    #[test]
    fn empty_inputs() {
        let usage = estimate_usage(&[], "");
        // `[]` is two bytes.
        assert_eq!(usage, Usage::new(0, 0));
    }
}
