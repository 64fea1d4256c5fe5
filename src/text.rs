//! Text preprocessing and chunking.
//!
//! The preprocessor is a pipeline of idempotent string transforms; the
//! chunker tries paragraph-respecting, then sentence-respecting, then a
//! plain character window, in that declared order of preference.

use crate::error::AppError;
use regex::Regex;
use std::sync::LazyLock;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s]+").unwrap());
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static PARAGRAPH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());
static SENTENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]+\s+").unwrap());

/// Policy for [`Preprocessor::preprocess`].
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    pub remove_urls: bool,
    pub remove_emails: bool,
    pub keep_punctuation: bool,
    pub min_length: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            remove_urls: true,
            remove_emails: true,
            keep_punctuation: true,
            min_length: 10,
        }
    }
}

/// HTML/whitespace/URL/email sanitation, each step idempotent in isolation
/// and the whole pipeline idempotent when re-applied.
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(PreprocessConfig::default())
    }
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// Unescape HTML entities then strip tags, replacing them with a space.
    pub fn clean_html(&self, text: &str) -> String {
        let unescaped = unescape_html_entities(text);
        TAG_RE.replace_all(&unescaped, " ").into_owned()
    }

    /// Collapse runs of whitespace to a single space and trim the ends.
    pub fn normalize_whitespace(&self, text: &str) -> String {
        WHITESPACE_RE.replace_all(text, " ").trim().to_string()
    }

    pub fn remove_urls(&self, text: &str) -> String {
        URL_RE.replace_all(text, "[URL]").into_owned()
    }

    pub fn remove_emails(&self, text: &str) -> String {
        EMAIL_RE.replace_all(text, "[EMAIL]").into_owned()
    }

    /// Strip characters outside `[A-Za-z0-9 ]`, optionally retaining basic
    /// sentence punctuation.
    pub fn remove_special_characters(&self, text: &str) -> String {
        text.chars()
            .filter(|c| {
                c.is_alphanumeric()
                    || c.is_whitespace()
                    || (self.config.keep_punctuation && matches!(c, '.' | ',' | '!' | '?' | '\'' | '-'))
            })
            .collect()
    }

    /// Run the full pipeline: HTML → URLs → emails → special chars →
    /// whitespace. Idempotent: `preprocess(preprocess(x)) == preprocess(x)`.
    /// Rejects empty input or input shorter than `min_length` after
    /// cleaning with a [`AppError::Validation`].
    pub fn preprocess(&self, text: &str) -> Result<String, AppError> {
        if text.trim().is_empty() {
            return Err(AppError::Validation("input text is empty".into()));
        }

        let mut out = self.clean_html(text);
        if self.config.remove_urls {
            out = self.remove_urls(&out);
        }
        if self.config.remove_emails {
            out = self.remove_emails(&out);
        }
        out = self.remove_special_characters(&out);
        out = self.normalize_whitespace(&out);

        if out.len() < self.config.min_length {
            return Err(AppError::Validation(format!(
                "preprocessed text shorter than minimum length {}",
                self.config.min_length
            )));
        }

        Ok(out)
    }
}

/// Unescape the handful of HTML entities that show up in crawled article
/// bodies. Not a full HTML5 entity table — matches the scope of the
/// source material this behavior is grounded on.
fn unescape_html_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
}

/// Parameters for [`Chunker`].
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub respect_paragraphs: bool,
    pub respect_sentences: bool,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            min_chunk_size: 50,
            max_chunk_size: 2000,
            respect_paragraphs: true,
            respect_sentences: true,
        }
    }
}

/// Splits text into chunks within `[min_chunk_size, max_chunk_size]`,
/// trying paragraph-respecting, then sentence-respecting, then a plain
/// character window, in that order of preference.
pub struct Chunker {
    config: ChunkConfig,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkConfig::default())
    }
}

impl Chunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// Dispatch to the preferred strategy. For text no longer than
    /// `chunk_size` this returns exactly one chunk equal to the input.
    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        if text.len() <= self.config.chunk_size {
            return vec![text.to_string()];
        }
        if self.config.respect_paragraphs {
            self.chunk_by_paragraphs(text)
        } else if self.config.respect_sentences {
            self.chunk_by_sentences(text)
        } else {
            self.chunk_by_characters(text)
        }
    }

    /// Split on blank lines; a paragraph that alone exceeds `chunk_size` is
    /// subdivided by sentence strategy rather than split mid-word.
    pub fn chunk_by_paragraphs(&self, text: &str) -> Vec<String> {
        let paragraphs: Vec<&str> = PARAGRAPH_RE
            .split(text)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        let mut chunks = Vec::new();
        let mut current = String::new();

        for paragraph in paragraphs {
            if paragraph.len() > self.config.chunk_size {
                if !current.is_empty() {
                    chunks.push(current.clone());
                    current.clear();
                }
                chunks.extend(self.chunk_by_sentences(paragraph));
                continue;
            }

            if current.is_empty() {
                current = paragraph.to_string();
            } else if current.len() + paragraph.len() + 2 <= self.config.chunk_size {
                current.push_str("\n\n");
                current.push_str(paragraph);
            } else {
                chunks.push(current.clone());
                current = paragraph.to_string();
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }

        self.add_overlap(self.enforce_bounds(chunks))
    }

    /// Split on sentence boundaries, accumulating into chunks that respect
    /// `chunk_size`/`min_chunk_size`.
    pub fn chunk_by_sentences(&self, text: &str) -> Vec<String> {
        let sentences: Vec<&str> = SENTENCE_RE
            .split(text)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let mut chunks = Vec::new();
        let mut current = String::new();

        for sentence in sentences {
            if current.is_empty() {
                current = sentence.to_string();
            } else if current.len() + sentence.len() + 1 <= self.config.chunk_size {
                current.push(' ');
                current.push_str(sentence);
            } else {
                chunks.push(current.clone());
                current = sentence.to_string();
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }

        self.add_overlap(self.enforce_bounds(chunks))
    }

    /// Plain character window, backing off to a sentence/word boundary
    /// near the cut point to avoid splitting mid-word.
    pub fn chunk_by_characters(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let bytes = text.as_bytes();
        let mut start = 0usize;

        while start < bytes.len() {
            let mut end = (start + self.config.chunk_size).min(bytes.len());
            if end < bytes.len() {
                end = find_boundary(text, start, end);
            }
            let slice = char_boundary_slice(text, start, end);
            if !slice.trim().is_empty() {
                chunks.push(slice.trim().to_string());
            }
            if end <= start {
                break;
            }
            start = end.saturating_sub(self.config.chunk_overlap).max(start + 1);
        }

        chunks
    }

    /// Prepend the trailing `chunk_overlap` chars of chunk i-1 to the front
    /// of chunk i; the first chunk is left unchanged.
    fn add_overlap(&self, chunks: Vec<String>) -> Vec<String> {
        if self.config.chunk_overlap == 0 || chunks.len() < 2 {
            return chunks;
        }
        let mut out = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 {
                out.push(chunk.clone());
                continue;
            }
            let prev = &chunks[i - 1];
            let tail_start = prev.len().saturating_sub(self.config.chunk_overlap);
            let tail = char_boundary_slice(prev, tail_start, prev.len());
            out.push(format!("{} {}", tail.trim(), chunk));
        }
        out
    }

    /// Merge chunks below `min_chunk_size` into a neighbor and hard-split
    /// any chunk above `max_chunk_size`.
    fn enforce_bounds(&self, chunks: Vec<String>) -> Vec<String> {
        let mut merged: Vec<String> = Vec::new();
        for chunk in chunks {
            if let Some(last) = merged.last_mut() {
                if last.len() < self.config.min_chunk_size {
                    last.push(' ');
                    last.push_str(&chunk);
                    continue;
                }
            }
            merged.push(chunk);
        }

        let mut bounded = Vec::new();
        for chunk in merged {
            if chunk.len() <= self.config.max_chunk_size {
                bounded.push(chunk);
            } else {
                bounded.extend(self.chunk_by_characters(&chunk));
            }
        }
        bounded
    }
}

fn char_boundary_slice(text: &str, start: usize, end: usize) -> &str {
    let mut s = start;
    while s < text.len() && !text.is_char_boundary(s) {
        s += 1;
    }
    let mut e = end.min(text.len());
    while e > s && !text.is_char_boundary(e) {
        e -= 1;
    }
    &text[s..e]
}

fn find_boundary(text: &str, start: usize, end: usize) -> usize {
    let search_start = end.saturating_sub(100).max(start);
    let window = char_boundary_slice(text, search_start, end);
    if let Some(pos) = window.rfind(|c: char| c == '.' || c == '!' || c == '?') {
        return search_start + pos + 1;
    }
    if let Some(pos) = window.rfind(char::is_whitespace) {
        return search_start + pos;
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preprocess_strips_html_urls_emails() {
        let pre = Preprocessor::default();
        let input = "<p>Visit https://example.com or mail me@example.com &amp; read on.</p>";
        let out = pre.preprocess(input).unwrap();
        assert!(out.contains("[URL]"));
        assert!(out.contains("[EMAIL]"));
        assert!(!out.contains('<'));
        assert!(out.contains('&') == false || out.contains("&amp;") == false);
    }

    #[test]
    fn preprocess_rejects_too_short_input() {
        let pre = Preprocessor::default();
        assert!(pre.preprocess("hi").is_err());
    }

    #[test]
    fn preprocess_rejects_empty_input() {
        let pre = Preprocessor::default();
        assert!(pre.preprocess("").is_err());
    }

    #[test]
    fn preprocess_is_idempotent() {
        let pre = Preprocessor::default();
        let input = "<b>Hello</b>   world, visit https://x.test now.";
        let once = pre.preprocess(input).unwrap();
        let twice = pre.preprocess(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn short_text_yields_single_chunk() {
        let chunker = Chunker::default();
        let text = "This is a short piece of text.";
        let chunks = chunker.chunk_text(text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], text);
    }

    #[test]
    fn long_text_is_split_into_multiple_chunks_within_bounds() {
        let config = ChunkConfig {
            chunk_size: 80,
            chunk_overlap: 10,
            min_chunk_size: 10,
            max_chunk_size: 160,
            ..ChunkConfig::default()
        };
        let chunker = Chunker::new(config.clone());
        let text = "Sentence one is here. Sentence two follows after it. Sentence three comes next in line. Sentence four wraps up the paragraph nicely.";
        let chunks = chunker.chunk_text(text);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.len() <= config.max_chunk_size);
        }
    }

    #[test]
    fn oversized_paragraph_falls_back_to_sentence_strategy() {
        let config = ChunkConfig {
            chunk_size: 50,
            chunk_overlap: 0,
            min_chunk_size: 5,
            max_chunk_size: 200,
            respect_paragraphs: true,
            respect_sentences: true,
        };
        let chunker = Chunker::new(config);
        let long_paragraph =
            "This is one long paragraph without blank lines. It has several sentences. Each should become chunk material.";
        let chunks = chunker.chunk_by_paragraphs(long_paragraph);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn chunker_respects_declared_strategy_order() {
        let paragraphs_config = ChunkConfig {
            chunk_size: 40,
            chunk_overlap: 0,
            min_chunk_size: 5,
            max_chunk_size: 100,
            respect_paragraphs: true,
            respect_sentences: true,
        };
        let chunker = Chunker::new(paragraphs_config);
        let text = "Para one has content.\n\nPara two has more content here.";
        let chunks = chunker.chunk_text(text);
        assert!(!chunks.is_empty());
    }
}
