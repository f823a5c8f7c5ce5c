use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use dashmap::DashMap;
use tracing::debug;

use crate::error::{KwsError, Result};

/// Pseudo-grapheme standing for "nothing" in insertions and deletions.
pub const SILENCE_GRAPHEME: &str = "sil";

/// Log-probability charged for a confusion never observed.
const UNSEEN_PENALTY: f64 = -40.0;

/// Maps a query term to a term the recognizer can actually emit.
pub trait TermMapper {
    /// Total: always returns some term, falling back to the input.
    fn closest_match(&self, term: &str) -> String;
}

/// Grapheme confusion log-probabilities, `ln P(observed | reference)`.
#[derive(Debug, Clone, Default)]
pub struct ConfusionMatrix {
    log_probs: HashMap<String, HashMap<String, f64>>,
}

impl ConfusionMatrix {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!("Failed to read confusion map '{}': {}", path.as_ref().display(), e)
        })?;
        Ok(Self::parse_str(&content)?)
    }

    /// Parses `reference observed count` lines and normalizes the counts of
    /// each reference grapheme into log-probabilities.
    pub fn parse_str(content: &str) -> Result<Self> {
        let mut counts: HashMap<String, HashMap<String, f64>> = HashMap::new();

        for (i, line) in content.lines().enumerate() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            let &[reference, observed, count] = fields.as_slice() else {
                return Err(KwsError::MalformedRecord {
                    line: i + 1,
                    reason: format!("expected 3 fields, got {}", fields.len()),
                });
            };
            let count: f64 = count.parse().map_err(|_| KwsError::MalformedRecord {
                line: i + 1,
                reason: format!("invalid count '{count}'"),
            })?;
            *counts
                .entry(reference.to_string())
                .or_default()
                .entry(observed.to_string())
                .or_default() += count;
        }

        let log_probs = counts
            .into_iter()
            .map(|(reference, row)| {
                let total: f64 = row.values().sum();
                let row = row
                    .into_iter()
                    .map(|(observed, count)| (observed, (count / total).ln()))
                    .collect();
                (reference, row)
            })
            .collect();

        Ok(Self { log_probs })
    }

    fn log_prob(&self, reference: &str, observed: &str) -> f64 {
        self.log_probs
            .get(reference)
            .and_then(|row| row.get(observed))
            .copied()
            .unwrap_or(UNSEEN_PENALTY)
    }

    /// Best-path log-likelihood of reading `observed` when `reference` was
    /// spoken (Wagner-Fischer maximizing summed log-probabilities).
    pub fn log_likelihood(&self, reference: &str, observed: &str) -> f64 {
        let reference: Vec<String> = reference.chars().map(String::from).collect();
        let observed: Vec<String> = observed.chars().map(String::from).collect();
        let n = observed.len();

        let mut prev = vec![0.0; n + 1];
        for j in 1..=n {
            prev[j] = prev[j - 1] + self.log_prob(SILENCE_GRAPHEME, &observed[j - 1]);
        }
        let mut curr = vec![0.0; n + 1];

        for r in &reference {
            let deletion = self.log_prob(r, SILENCE_GRAPHEME);
            curr[0] = prev[0] + deletion;
            for j in 1..=n {
                let o = &observed[j - 1];
                curr[j] = (prev[j] + deletion)
                    .max(curr[j - 1] + self.log_prob(SILENCE_GRAPHEME, o))
                    .max(prev[j - 1] + self.log_prob(r, o));
            }
            std::mem::swap(&mut prev, &mut curr);
        }
        prev[n]
    }

    /// Non-symmetric distance: negated log-likelihood.
    pub fn distance(&self, reference: &str, observed: &str) -> f64 {
        -self.log_likelihood(reference, observed)
    }
}

/// Replaces out-of-vocabulary query terms by the in-vocabulary word the
/// recognizer is most likely to have produced for them.
#[derive(Debug, Default)]
pub struct GraphemeMapper {
    vocabulary: BTreeSet<String>,
    matrix: ConfusionMatrix,
    /// Cleaned OOV term -> chosen proxy.
    cache: DashMap<String, String>,
}

impl GraphemeMapper {
    pub fn new(vocabulary: impl IntoIterator<Item = String>, matrix: ConfusionMatrix) -> Self {
        Self {
            vocabulary: vocabulary.into_iter().collect(),
            matrix,
            cache: DashMap::new(),
        }
    }

    /// Reads the first column of a pronunciation/decomposition dictionary.
    pub fn load_vocabulary(path: impl AsRef<Path>) -> anyhow::Result<Vec<String>> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!("Failed to read vocabulary '{}': {}", path.as_ref().display(), e)
        })?;
        Ok(content
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_string)
            .collect())
    }

    pub fn contains(&self, term: &str) -> bool {
        self.vocabulary.contains(term)
    }

    /// Maps every query token through [`TermMapper::closest_match`].
    pub fn map_query<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<String> {
        tokens
            .iter()
            .map(|token| self.closest_match(token.as_ref()))
            .collect()
    }

    fn search_vocabulary(&self, term: &str) -> Option<String> {
        let spoken = term.replace('\'', "");
        self.vocabulary
            .iter()
            .map(|word| {
                let distance = self.matrix.distance(&spoken, &word.replace('\'', ""));
                (distance, word)
            })
            .min_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)))
            .map(|(_, word)| word.clone())
    }
}

impl TermMapper for GraphemeMapper {
    fn closest_match(&self, term: &str) -> String {
        if self.contains(term) {
            return term.to_string();
        }

        let cleaned: String = term
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        if let Some(proxy) = self.cache.get(&cleaned) {
            return proxy.value().clone();
        }

        let proxy = self
            .search_vocabulary(&cleaned)
            .unwrap_or_else(|| cleaned.clone());
        debug!(term, proxy = %proxy, "OOV term mapped");
        self.cache.insert(cleaned, proxy.clone());
        proxy
    }
}
