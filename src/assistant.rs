use tracing::{debug, info, warn};

use crate::chat_types::Turn;
use crate::error::PraxisError;
use crate::llm::LlmProvider;
use crate::retrieval::Retriever;

pub const SYSTEM_INSTRUCTION: &str = "You are the Praxis ERP AI Assistant.
- Always answer clearly, concisely, and in complete sentences.
- Focus on guiding users through ERP features, generating or explaining reports, and suggesting next actions.
- If you don't know an answer, admit it and offer to escalate to human support.
- When giving step-by-step instructions, number each step.
- Refer to ERP modules by their exact names.

If you cannot confidently answer, reply:
\"I'm not certain about that. Would you like me to connect you with a support agent or documentation link?\"
";

pub const DOCS_HEADER: &str = "----\nRelevant Documentation:\n";

pub const FALLBACK_REPLY: &str = "I couldn't generate a response just now. Please try again.";

/// Ordered prompt parts: instruction, documentation context, one part per
/// turn, and a trailing `Assistant:` cue.
pub fn build_prompt(docs: &[String], history: &[Turn]) -> Vec<String> {
    let mut parts = Vec::with_capacity(history.len() + 3);
    parts.push(SYSTEM_INSTRUCTION.to_string());
    parts.push(format!("{DOCS_HEADER}{}", docs.join("\n\n")));
    for turn in history {
        parts.push(format!("{} {}", turn.role.prompt_prefix(), turn.content));
    }
    parts.push("Assistant:".to_string());
    parts
}

/// The most recent user turn, or an empty string.
pub fn last_user_text(history: &[Turn]) -> &str {
    history
        .iter()
        .rev()
        .find(|t| t.role == crate::chat_types::Role::User)
        .map(|t| t.content.as_str())
        .unwrap_or("")
}

pub struct Assistant {
    llm: Box<dyn LlmProvider>,
    retriever: Box<dyn Retriever>,
    retrieval_k: usize,
}

impl Assistant {
    pub fn new(llm: Box<dyn LlmProvider>, retriever: Box<dyn Retriever>, retrieval_k: usize) -> Self {
        Self {
            llm,
            retriever,
            retrieval_k,
        }
    }

    pub fn model(&self) -> &str {
        self.llm.model()
    }

    fn context_docs(&self, query: &str) -> Vec<String> {
        match self.retriever.retrieve(query, self.retrieval_k) {
            Ok(docs) => {
                debug!("Retrieved {} documentation snippets", docs.len());
                docs
            }
            Err(e) => {
                warn!("Retrieval failed, continuing without context: {e}");
                Vec::new()
            }
        }
    }

    /// Generate a trimmed reply for `history`, with documentation looked up
    /// for `query`. Provider errors propagate.
    pub async fn reply(&self, history: &[Turn], query: &str) -> Result<String, PraxisError> {
        let docs = self.context_docs(query);
        let parts = build_prompt(&docs, history);
        info!(
            "Requesting completion model={} parts={}",
            self.llm.model(),
            parts.len()
        );
        let text = self.llm.generate(parts).await?;
        Ok(text.trim().to_string())
    }

    /// Like [`Assistant::reply`] but never fails: errors and empty output
    /// become [`FALLBACK_REPLY`].
    pub async fn reply_or_fallback(&self, history: &[Turn], query: &str) -> String {
        match self.reply(history, query).await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => {
                warn!("Model returned an empty reply, using fallback");
                FALLBACK_REPLY.to_string()
            }
            Err(e) => {
                warn!("Model call failed, using fallback: {e}");
                FALLBACK_REPLY.to_string()
            }
        }
    }
}
