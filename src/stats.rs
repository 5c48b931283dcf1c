//! Statistics provider seam
//!
//! Tokenization and TF-IDF arithmetic live behind `StatisticsProvider`; the
//! pipeline only stores and moves the numbers it returns.

use indexmap::IndexMap;
use std::collections::HashSet;

/// Occurrences of one term in one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermCount {
    pub term: String,
    pub ngram_type: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentAnalysis {
    /// Token count before filtering
    pub word_length: u64,
    /// Distinct terms, in first-occurrence order
    pub terms: Vec<TermCount>,
    /// (term, tag) pairs
    pub named_entities: Vec<(String, String)>,
}

impl DocumentAnalysis {
    /// Highest count; the earliest term wins ties
    pub fn most_frequent(&self) -> Option<&TermCount> {
        self.terms
            .iter()
            .fold(None, |best: Option<&TermCount>, t| match best {
                Some(b) if b.count >= t.count => Some(b),
                _ => Some(t),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TfidfInput {
    pub term_frequency: u64,
    pub word_length: u64,
    pub document_frequency: u64,
    pub corpus_size: u64,
}

pub trait StatisticsProvider: Send + Sync {
    fn analyze(&self, text: &str) -> DocumentAnalysis;

    fn tfidf(&self, input: &TfidfInput) -> f64;
}

/// Lower-cased alphanumeric unigrams, `tf / len * ln(N / df)`
#[derive(Debug, Clone)]
pub struct SimpleStatistics {
    min_term_length: usize,
    stop_words: HashSet<String>,
}

impl Default for SimpleStatistics {
    fn default() -> Self {
        Self {
            min_term_length: 2,
            stop_words: HashSet::new(),
        }
    }
}

impl SimpleStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_term_length(mut self, min_term_length: usize) -> Self {
        self.min_term_length = min_term_length;
        self
    }

    pub fn with_stop_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.stop_words = words.into_iter().map(|w| w.as_ref().to_lowercase()).collect();
        self
    }
}

impl StatisticsProvider for SimpleStatistics {
    fn analyze(&self, text: &str) -> DocumentAnalysis {
        let mut counts: IndexMap<String, u64> = IndexMap::new();
        let mut word_length = 0;

        for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            word_length += 1;
            let token = token.to_lowercase();
            if token.chars().count() < self.min_term_length || self.stop_words.contains(&token) {
                continue;
            }
            *counts.entry(token).or_insert(0) += 1;
        }

        DocumentAnalysis {
            word_length,
            terms: counts
                .into_iter()
                .map(|(term, count)| TermCount {
                    term,
                    ngram_type: "unigram".to_string(),
                    count,
                })
                .collect(),
            named_entities: Vec::new(),
        }
    }

    fn tfidf(&self, input: &TfidfInput) -> f64 {
        if input.word_length == 0 || input.document_frequency == 0 || input.corpus_size == 0 {
            return 0.0;
        }
        let tf = input.term_frequency as f64 / input.word_length as f64;
        let idf = (input.corpus_size as f64 / input.document_frequency as f64).ln();
        tf * idf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_counts_terms() {
        let stats = SimpleStatistics::new().with_stop_words(["the"]);
        let analysis = stats.analyze("The cat saw the other Cat. A dog!");

        assert_eq!(analysis.word_length, 8);
        let terms: Vec<_> = analysis.terms.iter().map(|t| (t.term.as_str(), t.count)).collect();
        assert_eq!(terms, vec![("cat", 2), ("saw", 1), ("other", 1), ("dog", 1)]);
        assert_eq!(analysis.most_frequent().map(|t| t.term.as_str()), Some("cat"));
    }

    #[test]
    fn test_tfidf() {
        let stats = SimpleStatistics::new();
        let weight = stats.tfidf(&TfidfInput {
            term_frequency: 2,
            word_length: 10,
            document_frequency: 1,
            corpus_size: 4,
        });
        assert!((weight - 0.2 * 4f64.ln()).abs() < 1e-12);

        let everywhere = stats.tfidf(&TfidfInput {
            term_frequency: 2,
            word_length: 10,
            document_frequency: 4,
            corpus_size: 4,
        });
        assert_eq!(everywhere, 0.0);
    }
}
