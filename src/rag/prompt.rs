/// Prompt assembly and token-budget truncation
///
/// The assembled prompt carries, in order: fixed system instructions, the
/// best-ranked knowledge chunks, recent conversation history, the literal
/// user query, and a response cue. When the estimate exceeds the token
/// budget, sections are retained by priority: the query and cue always,
/// then as much recent history as fits, then as much knowledge as fits.
/// System instructions are the first thing sacrificed under pressure.

use crate::config::RagConfig;
use crate::types::{ConversationMessage, MessageRole, RetrievedChunk};
use tracing::debug;

const SYSTEM_INSTRUCTIONS: &str = "You are a knowledgeable assistant. Answer using the provided \
knowledge context when it is relevant, and say so when it is not. Be concise and accurate.";

const RESPONSE_CUE: &str = "Assistant:";

/// Maximum knowledge chunks included in a prompt
const MAX_PROMPT_CHUNKS: usize = 3;

/// Rough token estimate: one token per four characters, rounded up
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Truncate to a character budget on a char boundary
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        out.push_str("...");
        out
    }
}

pub struct PromptBuilder {
    token_budget: usize,
    chunk_char_budget: usize,
    history_turns: usize,
    history_char_budget: usize,
}

impl PromptBuilder {
    pub fn new(config: &RagConfig) -> Self {
        Self {
            token_budget: config.token_budget,
            chunk_char_budget: config.chunk_char_budget,
            history_turns: config.history_turns,
            history_char_budget: config.history_char_budget,
        }
    }

    fn knowledge_section(&self, chunks: &[RetrievedChunk]) -> Option<String> {
        if chunks.is_empty() {
            return None;
        }
        let mut section = String::from("Knowledge context:\n");
        for chunk in chunks.iter().take(MAX_PROMPT_CHUNKS) {
            section.push_str(&format!(
                "- {}\n",
                truncate_chars(&chunk.content, self.chunk_char_budget)
            ));
        }
        Some(section)
    }

    fn history_lines(&self, history: &[ConversationMessage]) -> Vec<String> {
        let skip = history.len().saturating_sub(self.history_turns);
        history[skip..]
            .iter()
            .map(|message| {
                let speaker = match message.role {
                    MessageRole::User => "User",
                    MessageRole::Assistant => "Assistant",
                };
                format!(
                    "{}: {}",
                    speaker,
                    truncate_chars(&message.content, self.history_char_budget)
                )
            })
            .collect()
    }

    /// Assemble the prompt, applying priority truncation if the full
    /// assembly exceeds the token budget. The user query and response cue
    /// are always present, even under an impossibly small budget: when the
    /// query+cue core alone is over budget it is returned whole, exempt
    /// from the final hard cut, rather than cutting into the query.
    pub fn build(
        &self,
        query: &str,
        chunks: &[RetrievedChunk],
        history: &[ConversationMessage],
    ) -> String {
        let knowledge = self.knowledge_section(chunks);
        let history_lines = self.history_lines(history);

        let full = self.render(
            Some(SYSTEM_INSTRUCTIONS),
            knowledge.as_deref(),
            &history_lines,
            query,
        );
        if estimate_tokens(&full) <= self.token_budget {
            return full;
        }

        debug!(
            "Prompt estimate {} exceeds budget {}, applying priority truncation",
            estimate_tokens(&full),
            self.token_budget
        );

        // Core that must survive: the literal query plus the response cue
        let core = self.render(None, None, &[], query);
        let core_tokens = estimate_tokens(&core);
        if core_tokens >= self.token_budget {
            // Even the core is over budget; keep it whole regardless
            return core;
        }
        let mut remaining = self.token_budget - core_tokens;

        // Next priority: recent conversation history, newest first. The
        // section header is paid for by the first retained line.
        let header_cost = estimate_tokens("Conversation so far:\n\n");
        let mut kept_history: Vec<String> = Vec::new();
        for line in history_lines.iter().rev() {
            let mut cost = estimate_tokens(line) + 1;
            if kept_history.is_empty() {
                cost += header_cost;
            }
            if cost > remaining {
                break;
            }
            remaining -= cost;
            kept_history.insert(0, line.clone());
        }

        // Last priority: as much knowledge context as fits
        let kept_knowledge = knowledge.filter(|section| {
            let cost = estimate_tokens(section) + 1;
            if cost <= remaining {
                remaining -= cost;
                true
            } else {
                false
            }
        });

        self.render(None, kept_knowledge.as_deref(), &kept_history, query)
    }

    fn render(
        &self,
        system: Option<&str>,
        knowledge: Option<&str>,
        history_lines: &[String],
        query: &str,
    ) -> String {
        let mut prompt = String::new();
        if let Some(system) = system {
            prompt.push_str(system);
            prompt.push_str("\n\n");
        }
        if let Some(knowledge) = knowledge {
            prompt.push_str(knowledge);
            prompt.push('\n');
        }
        if !history_lines.is_empty() {
            prompt.push_str("Conversation so far:\n");
            for line in history_lines {
                prompt.push_str(line);
                prompt.push('\n');
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!("User question: {}\n{}", query, RESPONSE_CUE));
        prompt
    }
}
