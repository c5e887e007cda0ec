//! Turning search hits into model context and reported sources

use crate::request::SourceRef;
use ragforge_common::models::SearchHit;

/// Answer returned when retrieval finds nothing; the model is not called
pub const NO_CONTEXT_ANSWER: &str = "No relevant information was found in the ingested documents.";

/// Retrieved chunks in rank order
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    hits: Vec<SearchHit>,
}

impl RetrievedContext {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self { hits }
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Full chunk texts handed to the language model
    pub fn texts(&self) -> Vec<String> {
        self.hits.iter().map(|hit| hit.payload.text.clone()).collect()
    }

    /// Distinct source ids, first appearance wins
    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for hit in &self.hits {
            if !ids.contains(&hit.payload.source_id) {
                ids.push(hit.payload.source_id.clone());
            }
        }
        ids
    }

    pub fn sources(&self, excerpt_chars: usize) -> Vec<SourceRef> {
        self.hits
            .iter()
            .map(|hit| SourceRef {
                chunk_id: hit.id,
                source_id: hit.payload.source_id.clone(),
                sequence_index: hit.payload.sequence_index,
                text_excerpt: excerpt(&hit.payload.text, excerpt_chars),
                score: hit.score,
            })
            .collect()
    }
}

/// First `max_chars` characters of `text`, marked with an ellipsis when cut
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}
