//! Prompt layout for a non-crisis chat turn.
//!
//! The user prompt is the combined memory context followed by the current
//! message and the `Chatbot:` cue:
//!
//! ```text
//! Relevant context:
//! <similar past lines>
//!
//! Recent messages:
//! <last N transcript lines>
//!
//! User: <message>
//! Chatbot:
//! ```
//!
//! Either context section is omitted entirely when it is empty.

pub const RELEVANT_HEADING: &str = "Relevant context:";
pub const RECENT_HEADING: &str = "Recent messages:";

/// Semantic matches first, then the recency window, each under its heading.
pub fn build_context_block(retrieved: &str, recent: &str) -> String {
    let mut block = String::new();
    if !retrieved.is_empty() {
        block.push_str(&format!("{RELEVANT_HEADING}\n{retrieved}\n\n"));
    }
    if !recent.is_empty() {
        block.push_str(&format!("{RECENT_HEADING}\n{recent}\n\n"));
    }
    block
}

pub fn build_user_prompt(context_block: &str, message: &str) -> String {
    format!("{context_block}User: {message}\nChatbot:")
}
