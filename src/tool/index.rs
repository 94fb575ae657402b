//! Text-similarity index over tool descriptions.
//!
//! Descriptions are tokenized into lowercase word tokens and scored against a
//! query with TF-IDF weighted cosine similarity. The index is append-only;
//! redefining a tool goes through delete + reinsert.

use std::collections::HashMap;

use crate::tool::ToolError;

/// Tokenizes free text into lowercase word tokens, splitting on
/// non-alphanumeric boundaries and dropping single-character tokens.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() {
            for lc in c.to_lowercase() {
                current.push(lc);
            }
        } else {
            if current.chars().count() > 1 {
                out.push(current.clone());
            }
            current.clear();
        }
    }
    if current.chars().count() > 1 {
        out.push(current);
    }
    out
}

fn term_counts(tokens: &[String]) -> HashMap<String, f32> {
    let mut counts: HashMap<String, f32> = HashMap::new();
    for token in tokens {
        *counts.entry(token.clone()).or_insert(0.0) += 1.0;
    }
    counts
}

struct IndexEntry {
    name: String,
    counts: HashMap<String, f32>,
}

/// Similarity index keyed by tool name.
#[derive(Default)]
pub struct ToolIndex {
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
    doc_freq: HashMap<String, usize>,
}

impl ToolIndex {
    /// Creates a new empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes a description under the given tool name.
    ///
    /// Fails with [`ToolError::Duplicate`] if the name is already indexed;
    /// the index is left unchanged on failure.
    pub fn add(&mut self, name: &str, description: &str) -> Result<(), ToolError> {
        if self.positions.contains_key(name) {
            return Err(ToolError::Duplicate(name.to_string()));
        }
        let counts = term_counts(&tokenize(description));
        for term in counts.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.positions.insert(name.to_string(), self.entries.len());
        self.entries.push(IndexEntry {
            name: name.to_string(),
            counts,
        });
        Ok(())
    }

    /// Removes a tool from the index. Returns whether it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let Some(pos) = self.positions.remove(name) else {
            return false;
        };
        let entry = self.entries.remove(pos);
        for term in entry.counts.keys() {
            if let Some(df) = self.doc_freq.get_mut(term) {
                *df -= 1;
                if *df == 0 {
                    self.doc_freq.remove(term);
                }
            }
        }
        for (idx, entry) in self.entries.iter().enumerate().skip(pos) {
            self.positions.insert(entry.name.clone(), idx);
        }
        true
    }

    /// Returns the number of indexed tools.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs a similarity search, returning `(name, score)` pairs.
    ///
    /// Keeps results with `score >= min_score` (zero-similarity entries are
    /// never returned), orders by score descending with name as the
    /// tie-break so a fixed index state yields a deterministic ranking, and
    /// truncates to `top_k`. An empty index or an empty query yields `[]`.
    pub fn query(&self, text: &str, top_k: usize, min_score: f32) -> Vec<(String, f32)> {
        let query_tokens = tokenize(text);
        if query_tokens.is_empty() || self.entries.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let query_counts = term_counts(&query_tokens);
        let query_weights: HashMap<&String, f32> = query_counts
            .iter()
            .map(|(term, tf)| (term, tf * self.idf(term)))
            .collect();
        let query_norm = query_weights.values().map(|w| w * w).sum::<f32>().sqrt();
        if query_norm == 0.0 {
            return Vec::new();
        }

        let mut scored: Vec<(String, f32)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let score = self.cosine(entry, &query_weights, query_norm);
                (score > 0.0 && score >= min_score).then(|| (entry.name.clone(), score))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(top_k);
        scored
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.entries.len() as f32;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f32;
        ((1.0 + n) / (1.0 + df)).ln() + 1.0
    }

    fn cosine(
        &self,
        entry: &IndexEntry,
        query_weights: &HashMap<&String, f32>,
        query_norm: f32,
    ) -> f32 {
        let mut dot = 0.0;
        for (term, query_weight) in query_weights {
            if let Some(tf) = entry.counts.get(*term) {
                dot += query_weight * tf * self.idf(term);
            }
        }
        if dot == 0.0 {
            return 0.0;
        }
        let entry_norm = entry
            .counts
            .iter()
            .map(|(term, tf)| {
                let w = tf * self.idf(term);
                w * w
            })
            .sum::<f32>()
            .sqrt();
        if entry_norm == 0.0 {
            return 0.0;
        }
        dot / (query_norm * entry_norm)
    }
}

impl std::fmt::Debug for ToolIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolIndex")
            .field("entries", &self.entries.len())
            .field("terms", &self.doc_freq.len())
            .finish()
    }
}
