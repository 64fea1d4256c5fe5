//! Free-form question answering (`/api/v1/qa/answer`): a single LLM call
//! with a word-limit instruction and a hard truncation fallback, grounded
//! in `blog_manager/services/qa_service.py`'s `_build_prompt`/
//! `_truncate_to_word_limit`. Distinct from [`crate::question_gen`], which
//! generates many exploratory questions from an article rather than
//! answering one question directly.

use crate::error::AppError;
use crate::llm::provider::{GenerationRequest, Message};
use crate::orchestrator::LlmOrchestrator;
use std::sync::Arc;

pub struct QaAnswer {
    pub answer: String,
    pub word_count: usize,
    pub model: String,
}

pub struct QaAnswerer {
    orchestrator: Arc<LlmOrchestrator>,
}

impl QaAnswerer {
    pub fn new(orchestrator: Arc<LlmOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn answer(&self, question: &str, context: Option<&str>, max_words: usize) -> Result<QaAnswer, AppError> {
        let prompt = build_prompt(question, context, max_words);
        let request = GenerationRequest::new(vec![Message::user(prompt)])
            .with_temperature(0.7)
            .with_max_tokens((max_words as u32).saturating_mul(2).max(64));
        let response = self.orchestrator.generate(request, None).await?;

        let mut answer = response.text.trim().to_string();
        let word_count = if count_words(&answer) > max_words {
            answer = truncate_to_word_limit(&answer, max_words);
            max_words
        } else {
            count_words(&answer)
        };

        Ok(QaAnswer {
            answer,
            word_count,
            model: response.model,
        })
    }
}

fn build_prompt(question: &str, context: Option<&str>, max_words: usize) -> String {
    let context_block = context
        .map(|c| format!("\n\nRelevant context:\n{c}"))
        .unwrap_or_default();
    format!(
        "You are a helpful assistant. Provide a clear, accurate, and concise answer to the following question.\n\n\
         Requirements:\n\
         - Keep your answer to approximately {max_words} words or less\n\
         - Be informative and helpful\n\
         - If the question is unclear, make reasonable assumptions and state them{context_block}\n\n\
         Question: {question}\n\nAnswer:"
    )
}

fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

fn truncate_to_word_limit(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().take(max_words).collect();
    format!("{}...", words.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_to_word_limit_adds_ellipsis() {
        let text = "one two three four five";
        assert_eq!(truncate_to_word_limit(text, 3), "one two three...");
    }

    #[test]
    fn build_prompt_includes_context_when_present() {
        let prompt = build_prompt("What is Rust?", Some("A systems language."), 200);
        assert!(prompt.contains("A systems language."));
    }

    #[test]
    fn build_prompt_omits_context_block_when_absent() {
        let prompt = build_prompt("What is Rust?", None, 200);
        assert!(!prompt.contains("Relevant context"));
    }
}
