//! Title generator (C15): a non-streaming sibling endpoint that asks the
//! model for a short conversation title, post-processes it, and degrades
//! gracefully on any failure rather than surfacing an error to the caller
//! (§4.7) — a missing title is a UI cosmetic, never worth a failed request.

use crate::convert::LLMMessage;
use crate::upstream::{build_request, UpstreamClient};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::state::AppState;

/// Wire request for the title-generation sibling endpoint (§4.7). Deliberately
/// narrower than [`crate::handler::ChatRequest`] — a single user message and
/// a conversation id for correlation, not a full `UIMessage` list, since the
/// title agent never needs prior turns or tool history to do its job.
#[derive(Debug, Deserialize)]
pub struct TitleRequest {
    #[serde(rename = "userMessage")]
    pub user_message: String,
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
}

#[derive(Debug, Serialize)]
pub struct TitleResponse {
    pub title: String,
    #[serde(rename = "useFallback")]
    pub use_fallback: bool,
}

const SYSTEM_PROMPT: &str = "Summarize the user's request in 3 to 6 words, as a plain \
    title with no quotation marks and no trailing punctuation.";

pub async fn generate(State(state): State<AppState>, Json(request): Json<TitleRequest>) -> impl IntoResponse {
    let span = tracing::info_span!("title.generate", conversation_id = %request.conversation_id);
    let model = state.config.title.model.clone().unwrap_or_else(|| state.config.upstream.default_model.clone());
    let max_length = state.config.title.max_length;

    let outcome = tokio::time::timeout(
        state.config.title.timeout(),
        run(&state.upstream, &request.user_message, &model, max_length).instrument(span),
    )
    .await;

    let response = match outcome {
        Ok(Ok(title)) => TitleResponse { title, use_fallback: false },
        Ok(Err(_)) | Err(_) => TitleResponse { title: String::new(), use_fallback: true },
    };

    // Always 200: a degraded title is not an error condition for the caller.
    Json(response)
}

async fn run(client: &UpstreamClient, user_message: &str, model: &str, max_length: usize) -> crate::Result<String> {
    let llm_messages = vec![
        LLMMessage::System { text: SYSTEM_PROMPT.into() },
        LLMMessage::User { text: user_message.into() },
    ];

    let request = build_request(model, &llm_messages, None, false, Some(32), Some(0.3));
    let completion = client.chat_completion(&request).await?;

    let raw = completion
        .choices
        .first()
        .and_then(|c| c.message.content.clone())
        .unwrap_or_default();

    Ok(post_process(&raw, max_length))
}

/// Strips whitespace and one layer of surrounding quotes, then truncates to
/// `max_length` at a word boundary, appending `...`. A boundary only counts
/// if it falls within the last 40% of the truncated prefix (§4.7); otherwise
/// the cut is a hard truncation, so a stray space near the start of a long
/// title doesn't produce a near-empty result.
fn post_process(raw: &str, max_length: usize) -> String {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim();

    let chars: Vec<char> = unquoted.chars().collect();
    if chars.len() <= max_length {
        return unquoted.to_string();
    }

    let prefix = &chars[..max_length];
    let window_start = (max_length as f64 * 0.6).floor() as usize;

    let boundary = prefix
        .iter()
        .enumerate()
        .rev()
        .find(|(i, c)| *i >= window_start && **c == ' ')
        .map(|(i, _)| i);

    let cut: String = match boundary {
        Some(i) if i > 0 => prefix[..i].iter().collect(),
        _ => prefix.iter().collect(),
    };

    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_surrounding_quotes_and_whitespace() {
        assert_eq!(post_process("  \"Plan the trip\"  ", 50), "Plan the trip");
    }

    #[test]
    fn truncates_long_titles_at_a_word_boundary() {
        let long = "This is a very long title that definitely exceeds the configured maximum length";
        let result = post_process(long, 20);
        assert!(result.ends_with("..."));
        assert!(!result.trim_end_matches('.').ends_with(' '));
        assert!(result.chars().count() <= 23);
    }

    #[test]
    fn hard_truncates_when_no_word_boundary_exists() {
        let long = "a".repeat(40);
        let result = post_process(&long, 10);
        assert_eq!(result, format!("{}...", "a".repeat(10)));
    }

    #[test]
    fn short_titles_pass_through_unchanged() {
        assert_eq!(post_process("Short title", 50), "Short title");
    }
}
