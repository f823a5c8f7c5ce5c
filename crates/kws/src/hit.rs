use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A detected query occurrence, scored by one or more systems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub document_id: String,
    pub channel_id: String,
    pub start_time: f64,
    pub duration: f64,
    /// System name -> confidence. At most one score per system.
    pub scores: BTreeMap<String, f64>,
}

impl Hit {
    /// Creates a hit carrying a single system's score.
    pub fn new(
        document_id: impl Into<String>,
        channel_id: impl Into<String>,
        start_time: f64,
        duration: f64,
        system: impl Into<String>,
        score: f64,
    ) -> Self {
        let mut scores = BTreeMap::new();
        scores.insert(system.into(), score);
        Self {
            document_id: document_id.into(),
            channel_id: channel_id.into(),
            start_time,
            duration,
            scores,
        }
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Highest per-system score, or negative infinity for an unscored hit.
    pub fn max_score(&self) -> f64 {
        self.scores
            .values()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Length of the intersection of the two `[start, end)` intervals.
    pub fn overlap(&self, other: &Hit) -> f64 {
        let start = self.start_time.max(other.start_time);
        let end = self.end_time().min(other.end_time());
        (end - start).max(0.0)
    }

    /// Whether two hits describe the same spoken event: same document and
    /// channel, and the intervals overlap by more than `overlap_ratio` of the
    /// shorter duration.
    ///
    /// Symmetric but not transitive: A may match B and B match C while A and
    /// C are disjoint. [`merge_list`] resolves this by encounter order.
    pub fn is_equivalent(&self, other: &Hit, overlap_ratio: f64) -> bool {
        self.document_id == other.document_id
            && self.channel_id == other.channel_id
            && self.overlap(other) > overlap_ratio * self.duration.min(other.duration)
    }
}

/// Merges two equivalent hits into a new one.
///
/// Identity fields come from the hit with the higher best score (`b` on
/// ties). Scores are the union of both maps; `b` wins on a key collision.
///
/// [`merge_list`] passes the incoming hit as `b`.
pub fn merge_pair(a: &Hit, b: &Hit) -> Hit {
    let winner = if b.max_score() >= a.max_score() { b } else { a };

    let mut scores = a.scores.clone();
    scores.extend(b.scores.iter().map(|(system, score)| (system.clone(), *score)));

    Hit {
        document_id: winner.document_id.clone(),
        channel_id: winner.channel_id.clone(),
        start_time: winner.start_time,
        duration: winner.duration,
        scores,
    }
}

/// Deduplicates hits in input order.
///
/// Each incoming hit is merged into the first equivalent entry of the working
/// list, or appended when none matches. Output keeps insertion order.
pub fn merge_list(hits: impl IntoIterator<Item = Hit>, overlap_ratio: f64) -> Vec<Hit> {
    let mut merged: Vec<Hit> = Vec::new();
    for hit in hits {
        match merged
            .iter_mut()
            .find(|existing| existing.is_equivalent(&hit, overlap_ratio))
        {
            Some(existing) => *existing = merge_pair(existing, &hit),
            None => merged.push(hit),
        }
    }
    merged
}
