use std::collections::HashSet;

use serde::Serialize;

use crate::{
    chunk::{Chunk, ChunkId},
    embedding::tokenize,
    error::Result,
};

/// Returned when no context supports an answer.
pub const NOT_FOUND: &str = "I couldn't find that in the uploaded document.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub text: String,
    /// Chunks the answer was drawn from, in rank order.
    pub cited: Vec<ChunkId>,
}

/// Turns a question and its ranked context into an answer.
pub trait AnswerGenerator: Send + Sync {
    fn generate(&self, question: &str, chunks: &[Chunk]) -> Result<Answer>;
}

/// Answers by quoting the context sentences that share the most words with
/// the question.
#[derive(Debug, Clone)]
pub struct ExtractiveAnswerer {
    pub max_chunks: usize,
    pub max_chars_per_chunk: usize,
    pub max_sentences: usize,
    pub fallback_chars: usize,
    pub fallback_sentences: usize,
}

impl Default for ExtractiveAnswerer {
    fn default() -> Self {
        Self {
            max_chunks: 4,
            max_chars_per_chunk: 1000,
            max_sentences: 5,
            fallback_chars: 800,
            fallback_sentences: 3,
        }
    }
}

impl ExtractiveAnswerer {
    fn compose(&self, question: &str, chunks: &[Chunk]) -> String {
        let question: HashSet<String> = tokenize(question).collect();

        let mut scored: Vec<(usize, &str)> = Vec::new();
        for chunk in chunks.iter().take(self.max_chunks) {
            let text = char_prefix(&chunk.text, self.max_chars_per_chunk);
            for sentence in split_sentences(text) {
                let words: HashSet<String> = tokenize(sentence).collect();
                let overlap = words.intersection(&question).count();
                if overlap > 0 {
                    scored.push((overlap, sentence));
                }
            }
        }

        if scored.is_empty() {
            let lead = chunks
                .first()
                .map(|c| {
                    split_sentences(char_prefix(&c.text, self.fallback_chars))
                        .into_iter()
                        .take(self.fallback_sentences)
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .unwrap_or_default();
            return if lead.is_empty() {
                NOT_FOUND.to_string()
            } else {
                lead
            };
        }

        // Stable: equal overlaps keep document order.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(self.max_sentences)
            .map(|(_, sentence)| sentence)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl AnswerGenerator for ExtractiveAnswerer {
    fn generate(&self, question: &str, chunks: &[Chunk]) -> Result<Answer> {
        if chunks.is_empty() {
            return Ok(Answer {
                text: NOT_FOUND.to_string(),
                cited: Vec::new(),
            });
        }

        Ok(Answer {
            text: self.compose(question, chunks),
            cited: chunks.iter().take(self.max_chunks).map(|c| c.id).collect(),
        })
    }
}

/// Split after `.`, `!` or `?` when followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        if !chars.peek().is_some_and(|&(_, next)| next.is_whitespace()) {
            continue;
        }
        sentences.push(&text[start..i + c.len_utf8()]);
        while chars.peek().is_some_and(|&(_, next)| next.is_whitespace()) {
            chars.next();
        }
        start = chars.peek().map_or(text.len(), |&(j, _)| j);
    }
    sentences.push(&text[start..]);

    sentences
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
