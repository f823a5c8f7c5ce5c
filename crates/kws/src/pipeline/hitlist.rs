use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::fusion::FusedHit;
use crate::hit::Hit;
use crate::normalize::Scored;
use crate::round_to;

/// A keyword query as handed over by the query preparation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub kwid: String,
    pub text: String,
}

impl Query {
    /// Lowercased whitespace-separated tokens of the query text.
    pub fn tokens(&self) -> Vec<String> {
        self.text.split_whitespace().map(str::to_lowercase).collect()
    }
}

/// One detection in the exchange format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitRecord {
    pub document_id: String,
    pub channel_id: String,
    pub start_time: f64,
    pub duration: f64,
    pub score: f64,
    #[serde(default = "default_decision")]
    pub decision: String,
    /// Per-system breakdown, present on fused output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<BTreeMap<String, f64>>,
}

fn default_decision() -> String {
    "YES".to_string()
}

/// Query id -> detections.
pub type HitList = BTreeMap<String, Vec<HitRecord>>;

impl From<&Hit> for HitRecord {
    fn from(hit: &Hit) -> Self {
        Self {
            document_id: hit.document_id.clone(),
            channel_id: hit.channel_id.clone(),
            start_time: round_to(hit.start_time, 2),
            duration: round_to(hit.duration, 2),
            score: round_to(hit.max_score(), 6),
            decision: default_decision(),
            scores: None,
        }
    }
}

impl From<&FusedHit> for HitRecord {
    fn from(fused: &FusedHit) -> Self {
        Self {
            score: round_to(fused.score, 6),
            scores: Some(fused.hit.scores.clone()),
            ..HitRecord::from(&fused.hit)
        }
    }
}

impl Scored for HitRecord {
    fn score(&self) -> f64 {
        self.score
    }

    fn set_score(&mut self, score: f64) {
        self.score = score;
    }

    fn duration(&self) -> f64 {
        self.duration
    }
}

/// Converts per-query hits (searched or fused) into the exchange format.
pub fn to_hit_list<'a, T>(per_query: &'a BTreeMap<String, Vec<T>>) -> HitList
where
    HitRecord: From<&'a T>,
{
    per_query
        .iter()
        .map(|(kwid, hits)| (kwid.clone(), hits.iter().map(HitRecord::from).collect()))
        .collect()
}

pub fn load_queries(path: impl AsRef<Path>) -> anyhow::Result<Vec<Query>> {
    let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        anyhow::anyhow!("Failed to read queries '{}': {}", path.as_ref().display(), e)
    })?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse queries '{}'", path.as_ref().display()))
}

pub fn read_hit_list(path: impl AsRef<Path>) -> anyhow::Result<HitList> {
    let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        anyhow::anyhow!("Failed to read hit list '{}': {}", path.as_ref().display(), e)
    })?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse hit list '{}'", path.as_ref().display()))
}

/// Loads one system's hit list as single-score hits attributed to `system`.
pub fn load_hit_list(
    path: impl AsRef<Path>,
    system: &str,
) -> anyhow::Result<BTreeMap<String, Vec<Hit>>> {
    let list = read_hit_list(path)?;
    Ok(list
        .into_iter()
        .map(|(kwid, records)| {
            let hits = records
                .into_iter()
                .map(|r| Hit::new(r.document_id, r.channel_id, r.start_time, r.duration, system, r.score))
                .collect();
            (kwid, hits)
        })
        .collect())
}

pub fn write_hit_list(path: impl AsRef<Path>, list: &HitList) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(list)?;
    std::fs::write(path.as_ref(), json).map_err(|e| {
        anyhow::anyhow!("Failed to write hit list '{}': {}", path.as_ref().display(), e)
    })
}
