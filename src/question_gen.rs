//! Exploratory question generation: a three-layer prompt (format enforcement,
//! role/instructions, inline schema example), a single JSON repair pass on
//! malformed output, and a paragraph-snippet fallback when repair also fails.

use crate::error::{AppError, PipelineError};
use crate::llm::provider::{GenerationRequest, Message};
use crate::orchestrator::LlmOrchestrator;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const MAX_ARTICLE_CHARS: usize = 4000;

const OUTPUT_FORMAT_INSTRUCTION: &str = "You MUST respond ONLY with valid JSON in the exact format specified below.
Do not include any text, explanation, or markdown outside the JSON structure.
Never deviate from the required JSON schema.

CRITICAL REQUIREMENTS:
- Every question MUST have both \"question\" and \"answer\" fields populated with non-empty strings
- All questions must be complete and valid
- Do not include any questions with empty, null, or missing fields";

const DEFAULT_INSTRUCTIONS: &str = "You are an expert assistant generating curiosity-driven, value-adding exploratory \
questions for a content engagement panel. Generate questions that promise a genuine deep-dive answer beyond the \
article's surface facts, anchored to specific, high-value concepts named in the article. Keep each question under \
120 characters and each answer under roughly 200 words. For each question, also provide a `keyword_anchor` (the \
concept it is anchored to) and a `probability` in [0,1] expressing how representative it is of the full space of \
questions that could be asked about this article.";

const SCHEMA_EXAMPLE: &str = r#"{
    "questions": [
        {
            "question": "Question text here?",
            "answer": "Detailed answer here.",
            "keyword_anchor": "anchor concept",
            "probability": 0.95
        }
    ]
}"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub keyword_anchor: Option<String>,
    #[serde(default)]
    pub probability: f32,
}

impl QaPair {
    fn is_valid(&self) -> bool {
        !self.question.trim().is_empty() && !self.answer.trim().is_empty() && (0.0..=1.0).contains(&self.probability)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QuestionsEnvelope {
    questions: Vec<QaPair>,
}

#[derive(Debug, Clone)]
pub struct GeneratedQuestionSet {
    pub questions: Vec<QaPair>,
    pub degraded: bool,
}

pub struct QuestionGenerator {
    orchestrator: std::sync::Arc<LlmOrchestrator>,
}

impl QuestionGenerator {
    pub fn new(orchestrator: std::sync::Arc<LlmOrchestrator>) -> Self {
        Self { orchestrator }
    }

    fn build_prompt(title: &str, body: &str, num_questions: usize, custom_instruction: Option<&str>) -> String {
        let truncated: String = body.chars().take(MAX_ARTICLE_CHARS).collect();
        let instructions = custom_instruction.unwrap_or(DEFAULT_INSTRUCTIONS);
        format!(
            "{OUTPUT_FORMAT_INSTRUCTION}\n\n{instructions}\n\nGenerate approximately {num_questions} questions.\n\n\
             Required JSON schema:\n{SCHEMA_EXAMPLE}\n\n\
             Article title: {title}\n\nArticle content:\n{truncated}"
        )
    }

    pub async fn generate(
        &self,
        title: &str,
        body: &str,
        num_questions: usize,
        custom_instruction: Option<&str>,
        cancellation: CancellationToken,
    ) -> Result<GeneratedQuestionSet, AppError> {
        let prompt = Self::build_prompt(title, body, num_questions, custom_instruction);
        let request = GenerationRequest::new(vec![Message::user(prompt)]).with_temperature(0.7);

        let response = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                return Err(AppError::ServiceUnavailable("cancelled by sibling task".to_string()));
            }
            result = self.orchestrator.generate(request, None) => result?,
        };

        let valid = Self::parse_and_validate(&response.text)
            .or_else(|| Self::repair_and_validate(&response.text))
            .map(|questions| GeneratedQuestionSet { questions, degraded: false });

        let result = match valid {
            Some(set) if !set.questions.is_empty() => set,
            _ => Self::fallback_from_paragraphs(body),
        };

        if result.questions.is_empty() {
            return Err(PipelineError::CorruptArtifact.into());
        }
        Ok(result)
    }

    fn parse_and_validate(text: &str) -> Option<Vec<QaPair>> {
        let envelope: QuestionsEnvelope = serde_json::from_str(text.trim()).ok()?;
        Some(Self::filter_valid(envelope.questions))
    }

    /// Extract the first JSON object or array substring and retry parsing.
    fn repair_and_validate(text: &str) -> Option<Vec<QaPair>> {
        let start = text.find(['{', '['])?;
        let open = text.as_bytes()[start] as char;
        let close = if open == '{' { '}' } else { ']' };
        let end = text.rfind(close)?;
        if end <= start {
            return None;
        }
        let candidate = &text[start..=end];
        let envelope: QuestionsEnvelope = serde_json::from_str(candidate).ok()?;
        Some(Self::filter_valid(envelope.questions))
    }

    fn filter_valid(questions: Vec<QaPair>) -> Vec<QaPair> {
        questions.into_iter().filter(QaPair::is_valid).collect()
    }

    /// Degraded fallback: turns paragraph snippets into low-confidence
    /// questions when the model's output cannot be salvaged.
    fn fallback_from_paragraphs(body: &str) -> GeneratedQuestionSet {
        let questions = body
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .take(3)
            .map(|paragraph| {
                let snippet: String = paragraph.chars().take(100).collect();
                QaPair {
                    question: format!("What does the article say about: {snippet}...?"),
                    answer: paragraph.chars().take(400).collect(),
                    keyword_anchor: None,
                    probability: 0.3,
                }
            })
            .collect();

        GeneratedQuestionSet { questions, degraded: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_validate_drops_invalid_items() {
        let text = r#"{"questions": [
            {"question": "Valid?", "answer": "Yes", "probability": 0.5},
            {"question": "", "answer": "Yes", "probability": 0.5},
            {"question": "Bad prob", "answer": "Yes", "probability": 1.5}
        ]}"#;
        let questions = QuestionGenerator::parse_and_validate(text).unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].question, "Valid?");
    }

    #[test]
    fn repair_and_validate_extracts_json_from_surrounding_prose() {
        let text = "Sure, here you go:\n{\"questions\": [{\"question\": \"Q?\", \"answer\": \"A\", \"probability\": 0.8}]}\nHope that helps!";
        let questions = QuestionGenerator::repair_and_validate(text).unwrap();
        assert_eq!(questions.len(), 1);
    }

    #[test]
    fn fallback_from_paragraphs_is_marked_degraded_with_low_confidence() {
        let body = "First paragraph about a topic.\n\nSecond paragraph about another topic.";
        let set = QuestionGenerator::fallback_from_paragraphs(body);
        assert!(set.degraded);
        assert!(set.questions.iter().all(|q| q.probability <= 0.3));
        assert_eq!(set.questions.len(), 2);
    }

    #[test]
    fn build_prompt_truncates_article_body() {
        let body = "x".repeat(MAX_ARTICLE_CHARS * 2);
        let prompt = QuestionGenerator::build_prompt("Title", &body, 5, None);
        assert!(prompt.len() < body.len());
    }
}
