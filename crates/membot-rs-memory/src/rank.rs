//! Ranking strategies for multi-result memory lookups.

use crate::model::{MemoryEntry, normalize_text};
use std::collections::HashSet;

/// Orders candidate entries by relevance to a query.
pub trait Ranker: Send + Sync {
    /// Filter and order `candidates`, most relevant first.
    fn rank(&self, query: &str, candidates: Vec<MemoryEntry>) -> Vec<MemoryEntry>;
}

/// Substring containment, oldest first.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringRanker;

impl Ranker for SubstringRanker {
    fn rank(&self, query: &str, mut candidates: Vec<MemoryEntry>) -> Vec<MemoryEntry> {
        let needle = normalize_text(query);
        candidates.retain(|entry| entry.matches(&needle));
        candidates.sort_by_key(|entry| entry.sequence);
        candidates
    }
}

/// Token overlap ranking.
///
/// Entries sharing no token with the query are dropped; ties keep sequence order.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordRanker;

impl KeywordRanker {
    fn tokens(text: &str) -> HashSet<String> {
        text.split(|ch: char| !ch.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .map(str::to_lowercase)
            .collect()
    }
}

impl Ranker for KeywordRanker {
    fn rank(&self, query: &str, mut candidates: Vec<MemoryEntry>) -> Vec<MemoryEntry> {
        let query_tokens = Self::tokens(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        candidates.sort_by_key(|entry| entry.sequence);
        let mut scored: Vec<(usize, MemoryEntry)> = candidates
            .into_iter()
            .map(|entry| {
                let overlap = Self::tokens(&entry.text).intersection(&query_tokens).count();
                (overlap, entry)
            })
            .filter(|(overlap, _)| *overlap > 0)
            .collect();
        // Stable sort keeps insertion order within equal scores.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().map(|(_, entry)| entry).collect()
    }
}

/// Turns text into a dense vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Cosine similarity ranking over embeddings.
pub struct EmbeddingRanker<E> {
    embedder: E,
    min_score: Option<f32>,
}

impl<E: Embedder> EmbeddingRanker<E> {
    pub fn new(embedder: E) -> Self {
        Self {
            embedder,
            min_score: None,
        }
    }

    /// Drop candidates scoring below `min_score`.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }
}

impl<E: Embedder> Ranker for EmbeddingRanker<E> {
    fn rank(&self, query: &str, mut candidates: Vec<MemoryEntry>) -> Vec<MemoryEntry> {
        let query_vector = self.embedder.embed(&normalize_text(query));
        candidates.sort_by_key(|entry| entry.sequence);
        let mut scored: Vec<(f32, MemoryEntry)> = candidates
            .into_iter()
            .map(|entry| {
                let score = cosine_similarity(&query_vector, &self.embedder.embed(&entry.text));
                (score, entry)
            })
            .filter(|(score, _)| self.min_score.is_none_or(|min| *score >= min))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().map(|(_, entry)| entry).collect()
    }
}

/// Cosine similarity, 0.0 for mismatched or zero-length vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::{
        Embedder, EmbeddingRanker, KeywordRanker, Ranker, SubstringRanker, cosine_similarity,
    };
    use crate::model::MemoryEntry;
    use pretty_assertions::assert_eq;

    fn entries(texts: &[&str]) -> Vec<MemoryEntry> {
        texts
            .iter()
            .enumerate()
            .map(|(idx, text)| MemoryEntry::new("ns", *text, idx as u64 + 1))
            .collect()
    }

    fn originals(ranked: Vec<MemoryEntry>) -> Vec<String> {
        ranked.into_iter().map(|e| e.original).collect()
    }

    #[test]
    fn substring_keeps_matches_in_sequence_order() {
        let mut candidates = entries(&["apple pie", "banana", "Apple tart"]);
        candidates.reverse();
        let ranked = SubstringRanker.rank("APPLE", candidates);
        assert_eq!(originals(ranked), vec!["apple pie", "Apple tart"]);
    }

    #[test]
    fn keyword_orders_by_overlap_then_sequence() {
        let candidates = entries(&["red apple", "green apple pie", "blue sky", "apple pie recipe"]);
        let ranked = KeywordRanker.rank("apple pie", candidates);
        assert_eq!(
            originals(ranked),
            vec!["green apple pie", "apple pie recipe", "red apple"]
        );
    }

    #[test]
    fn keyword_with_blank_query_is_empty() {
        assert!(KeywordRanker.rank("  !! ", entries(&["anything"])).is_empty());
    }

    struct LengthEmbedder;

    impl Embedder for LengthEmbedder {
        fn embed(&self, text: &str) -> Vec<f32> {
            let vowels = text.chars().filter(|c| "aeiou".contains(*c)).count() as f32;
            vec![text.len() as f32, vowels]
        }
    }

    #[test]
    fn embedding_ranker_applies_min_score() {
        let ranker = EmbeddingRanker::new(LengthEmbedder).with_min_score(0.99);
        let ranked = ranker.rank("aaaa", entries(&["aaaa", "bcdfg"]));
        assert_eq!(originals(ranked), vec!["aaaa"]);
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
    }
}
