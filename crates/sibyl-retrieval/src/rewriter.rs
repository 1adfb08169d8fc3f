//! Turning conversational utterances into standalone search queries.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use sibyl_gateway::{Gateway, GenerateRequest, Message, Transport};

static MENTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<@!?\d+>|@\w+").unwrap());
static MARKDOWN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[*_~`#>|]+").unwrap());

const SYSTEM_PROMPT: &str = "Rewrite the user's last message as a standalone search query. \
Resolve pronouns and references using only the conversation provided. \
Reply with the query alone, no explanation.";

#[derive(Debug, Clone)]
pub struct RewriteConfig {
    /// Most recent history turns included in the prompt.
    pub history_window: usize,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self { history_window: 6 }
    }
}

/// One prior turn of the conversation.
#[derive(Debug, Clone)]
pub struct HistoryTurn {
    pub speaker: String,
    pub text: String,
}

pub struct QueryRewriter<T: Transport> {
    gateway: Arc<Gateway<T>>,
    config: RewriteConfig,
}

impl<T: Transport> QueryRewriter<T> {
    pub fn new(gateway: Arc<Gateway<T>>, config: RewriteConfig) -> Self {
        Self { gateway, config }
    }

    /// Rewrite `speaker`'s `utterance` into a standalone query. Never
    /// fails: when the model is unavailable or refuses, the utterance is
    /// cleaned up locally instead. A non-empty utterance always yields a
    /// non-empty query.
    pub async fn rewrite(&self, utterance: &str, speaker: &str, history: &[HistoryTurn]) -> String {
        if utterance.trim().is_empty() {
            return String::new();
        }

        let request = self.build_request(utterance, speaker, history);
        match self.gateway.generate(&request).await {
            Ok(reply) if !reply.blocked && !reply.text.trim().is_empty() => {
                reply.text.trim().to_owned()
            }
            Ok(_) => {
                tracing::debug!("rewrite refused, falling back to cleanup");
                fallback_cleanup(utterance)
            }
            Err(err) => {
                tracing::warn!(error = %err, "rewrite failed, falling back to cleanup");
                fallback_cleanup(utterance)
            }
        }
    }

    fn build_request(
        &self,
        utterance: &str,
        speaker: &str,
        history: &[HistoryTurn],
    ) -> GenerateRequest {
        let start = history.len().saturating_sub(self.config.history_window);
        let mut prompt = String::new();
        if start < history.len() {
            prompt.push_str("Conversation:\n");
            for turn in &history[start..] {
                prompt.push_str(&format!("{}: {}\n", turn.speaker, turn.text));
            }
            prompt.push('\n');
        }
        // Naming the speaker lets the model resolve first-person
        // references against the right participant in the history.
        prompt.push_str(&format!("Message to rewrite, from {speaker}: {utterance}"));

        GenerateRequest::new(
            self.gateway.generation_model().to_owned(),
            vec![Message::user(prompt)],
        )
        .with_system(SYSTEM_PROMPT)
    }
}

/// Strip mentions, markdown, and surrounding quotes, collapse whitespace.
/// Falls back to the collapsed original rather than returning empty.
fn fallback_cleanup(utterance: &str) -> String {
    let stripped = MENTION.replace_all(utterance, " ");
    let stripped = MARKDOWN.replace_all(&stripped, " ");
    let cleaned = stripped
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if cleaned.is_empty() {
        utterance.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        cleaned
    }
}
