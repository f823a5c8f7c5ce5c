use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::FusionConfig;
use crate::error::{KwsError, Result};
use crate::hit::{Hit, merge_list};

/// Score combination formula applied to a merged hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FusionMethod {
    /// Plain sum of the system scores.
    Sum,
    /// Sum multiplied by the number of agreeing systems.
    Mnz,
    /// MNZ with each term weighted by the system's share of total quality.
    WeightedMnz,
    /// Each score weighted by `2^(quality - best quality)`.
    Power2,
}

impl FusionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionMethod::Sum => "SUM",
            FusionMethod::Mnz => "MNZ",
            FusionMethod::WeightedMnz => "WEIGHTED_MNZ",
            FusionMethod::Power2 => "POWER2",
        }
    }
}

impl fmt::Display for FusionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FusionMethod {
    type Err = KwsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SUM" | "COMBSUM" => Ok(FusionMethod::Sum),
            "MNZ" | "COMBMNZ" => Ok(FusionMethod::Mnz),
            "WEIGHTED_MNZ" | "WMNZ" | "WCOMBMNZ" => Ok(FusionMethod::WeightedMnz),
            "POWER2" => Ok(FusionMethod::Power2),
            _ => Err(KwsError::UnsupportedMethod(s.to_string())),
        }
    }
}

/// Per-system overall quality (e.g. MTWV), fixed for one fusion run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SystemRegistry {
    systems: BTreeMap<String, f64>,
}

impl SystemRegistry {
    pub fn new(systems: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self {
            systems: systems.into_iter().collect(),
        }
    }

    /// Loads a JSON object mapping system name to quality.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!("Failed to read registry '{}': {}", path.as_ref().display(), e)
        })?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse registry '{}'", path.as_ref().display()))
    }

    pub fn quality(&self, system: &str) -> Result<f64> {
        self.systems
            .get(system)
            .copied()
            .ok_or_else(|| KwsError::UnknownSystem(system.to_string()))
    }

    pub fn total_quality(&self) -> f64 {
        self.systems.values().sum()
    }

    /// Best quality in the registry, or 0 when empty.
    pub fn best_quality(&self) -> f64 {
        self.systems
            .values()
            .copied()
            .reduce(f64::max)
            .unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}

/// Collapses a merged hit's per-system scores into one value.
///
/// `epsilon` guards the total-quality denominator of weighted MNZ. Systems
/// missing from the registry are an error for the quality-weighted methods.
pub fn combine_score(
    hit: &Hit,
    registry: &SystemRegistry,
    method: FusionMethod,
    epsilon: f64,
) -> Result<f64> {
    let agreeing = hit.scores.len() as f64;
    let sum: f64 = hit.scores.values().sum();

    match method {
        FusionMethod::Sum => Ok(sum),
        FusionMethod::Mnz => Ok(agreeing * sum),
        FusionMethod::WeightedMnz => {
            let total = registry.total_quality() + epsilon;
            hit.scores.iter().try_fold(0.0, |acc, (system, score)| -> Result<f64> {
                let weight = registry.quality(system)? / total;
                Ok(acc + agreeing * weight * score)
            })
        }
        FusionMethod::Power2 => {
            let best = registry.best_quality();
            hit.scores.iter().try_fold(0.0, |acc, (system, score)| -> Result<f64> {
                let quality = registry.quality(system)?;
                Ok(acc + 2f64.powf(quality - best) * score)
            })
        }
    }
}

/// A deduplicated hit with its combined score and the per-system breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedHit {
    #[serde(flatten)]
    pub hit: Hit,
    pub score: f64,
}

/// Hit lists of every system for one query, in system order.
pub type SystemHits = Vec<(String, Vec<Hit>)>;

/// Merges the hit lists of several systems and rescores the result.
#[derive(Debug, Clone)]
pub struct FusionEngine {
    registry: Arc<SystemRegistry>,
    config: FusionConfig,
}

impl FusionEngine {
    pub fn new(registry: Arc<SystemRegistry>, config: FusionConfig) -> Self {
        info!(
            systems = registry.len(),
            method = %config.method,
            overlap_ratio = config.overlap_ratio,
            "Fusion engine created"
        );
        Self { registry, config }
    }

    pub fn registry(&self) -> &SystemRegistry {
        &self.registry
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fuses one query's hits: flatten in system order, merge equivalent
    /// hits, then score each survivor.
    ///
    /// The system names only fix the flattening order; each hit's scores
    /// already carry the systems that produced them.
    pub fn fuse_query(&self, per_system_hits: &[(String, Vec<Hit>)]) -> Result<Vec<FusedHit>> {
        let flattened = per_system_hits
            .iter()
            .flat_map(|(_, hits)| hits.iter().cloned());
        let merged = merge_list(flattened, self.config.overlap_ratio);

        merged
            .into_iter()
            .map(|hit| {
                let score =
                    combine_score(&hit, &self.registry, self.config.method, self.config.epsilon)?;
                Ok(FusedHit { hit, score })
            })
            .collect()
    }

    /// Fuses every query independently.
    pub fn fuse_document_set(
        &self,
        queries: &BTreeMap<String, SystemHits>,
    ) -> Result<BTreeMap<String, Vec<FusedHit>>> {
        let mut fused = BTreeMap::new();
        for (kwid, per_system_hits) in queries {
            let hits = self.fuse_query(per_system_hits)?;
            debug!(%kwid, hits = hits.len(), "Query fused");
            fused.insert(kwid.clone(), hits);
        }
        info!(queries = fused.len(), "Fusion complete");
        Ok(fused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EPSILON;

    fn registry() -> SystemRegistry {
        SystemRegistry::new([("s1".to_string(), 0.6), ("s2".to_string(), 0.4)])
    }

    fn two_system_hit(s1: f64, s2: f64) -> Hit {
        let mut hit = Hit::new("doc", "1", 0.0, 1.0, "s1", s1);
        hit.scores.insert("s2".to_string(), s2);
        hit
    }

    fn engine(method: FusionMethod) -> FusionEngine {
        FusionEngine::new(
            Arc::new(registry()),
            FusionConfig {
                method,
                ..FusionConfig::default()
            },
        )
    }

    #[test]
    fn test_sum_single_system_is_raw_score() {
        let hit = Hit::new("doc", "1", 0.0, 1.0, "s1", 0.42);
        let score = combine_score(&hit, &registry(), FusionMethod::Sum, EPSILON).unwrap();
        assert!((score - 0.42).abs() < 1e-9);
    }

    #[test]
    fn test_mnz_two_systems() {
        let hit = two_system_hit(0.3, 0.5);
        let score = combine_score(&hit, &registry(), FusionMethod::Mnz, EPSILON).unwrap();
        assert!((score - 2.0 * (0.3 + 0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_mnz() {
        let hit = two_system_hit(0.3, 0.5);
        let score = combine_score(&hit, &registry(), FusionMethod::WeightedMnz, EPSILON).unwrap();
        let expected = 2.0 * (0.6 * 0.3 + 0.4 * 0.5) / (1.0 + EPSILON);
        assert!((score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_power2_downweights_weaker_system() {
        let hit = two_system_hit(0.3, 0.5);
        let score = combine_score(&hit, &registry(), FusionMethod::Power2, EPSILON).unwrap();
        let expected = 0.3 + 2f64.powf(-0.2) * 0.5;
        assert!((score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_zero_total_quality_is_guarded() {
        let zero = SystemRegistry::new([("s1".to_string(), 0.0)]);
        let hit = Hit::new("doc", "1", 0.0, 1.0, "s1", 0.5);
        let score = combine_score(&hit, &zero, FusionMethod::WeightedMnz, EPSILON).unwrap();
        assert!(score.is_finite());
        assert!(score.abs() < 1e-9);
    }

    #[test]
    fn test_unknown_system_rejected_for_weighted_methods() {
        let hit = Hit::new("doc", "1", 0.0, 1.0, "s9", 0.5);
        for method in [FusionMethod::WeightedMnz, FusionMethod::Power2] {
            assert!(matches!(
                combine_score(&hit, &registry(), method, EPSILON),
                Err(KwsError::UnknownSystem(_))
            ));
        }
        assert!(combine_score(&hit, &registry(), FusionMethod::Sum, EPSILON).is_ok());
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("sum".parse::<FusionMethod>().unwrap(), FusionMethod::Sum);
        assert_eq!("CombMNZ".parse::<FusionMethod>().unwrap(), FusionMethod::Mnz);
        assert_eq!("WCombMNZ".parse::<FusionMethod>().unwrap(), FusionMethod::WeightedMnz);
        assert_eq!("Power2".parse::<FusionMethod>().unwrap(), FusionMethod::Power2);
        assert!(matches!(
            "median".parse::<FusionMethod>(),
            Err(KwsError::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn test_fuse_query_merges_across_systems() {
        let a = Hit::new("doc", "1", 0.0, 2.0, "s1", 0.9);
        let b = Hit::new("doc", "1", 0.5, 2.0, "s2", 0.5);
        let fused = engine(FusionMethod::Sum)
            .fuse_query(&[("s1".to_string(), vec![a]), ("s2".to_string(), vec![b])])
            .unwrap();
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 1.4).abs() < 1e-9);
        assert!((fused[0].hit.start_time - 0.0).abs() < 1e-9);
        assert!((fused[0].hit.duration - 2.0).abs() < 1e-9);
        assert_eq!(fused[0].hit.scores.len(), 2);
    }

    #[test]
    fn test_fuse_query_dedups_within_one_system() {
        let a = Hit::new("doc", "1", 0.0, 1.0, "s1", 0.4);
        let b = Hit::new("doc", "1", 0.1, 1.0, "s1", 0.6);
        let fused = engine(FusionMethod::Sum)
            .fuse_query(&[("s1".to_string(), vec![a, b])])
            .unwrap();
        assert_eq!(fused.len(), 1);
        // same system twice: the later score overwrites
        assert!((fused[0].score - 0.6).abs() < 1e-9);
        assert!((fused[0].hit.start_time - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_fuse_document_set_is_per_query() {
        let mut queries = BTreeMap::new();
        queries.insert(
            "KW-1".to_string(),
            vec![("s1".to_string(), vec![Hit::new("doc", "1", 0.0, 1.0, "s1", 0.5)])],
        );
        queries.insert(
            "KW-2".to_string(),
            vec![("s2".to_string(), vec![Hit::new("doc", "1", 0.0, 1.0, "s2", 0.5)])],
        );
        let fused = engine(FusionMethod::Mnz).fuse_document_set(&queries).unwrap();
        assert_eq!(fused.len(), 2);
        assert_eq!(fused["KW-1"].len(), 1);
        assert_eq!(fused["KW-2"].len(), 1);
    }

    #[test]
    fn test_fuse_query_unknown_system_for_power2() {
        let hit = Hit::new("doc", "1", 0.0, 1.0, "s9", 0.5);
        let result = engine(FusionMethod::Power2).fuse_query(&[("s9".to_string(), vec![hit])]);
        assert!(matches!(result, Err(KwsError::UnknownSystem(_))));
    }

    #[test]
    fn test_fuse_query_list_order_not_names_decides() {
        let a = Hit::new("doc", "1", 0.0, 2.0, "s1", 0.5);
        let b = Hit::new("doc", "1", 0.5, 2.0, "s2", 0.5);
        let fusion = engine(FusionMethod::WeightedMnz);

        let forward = fusion
            .fuse_query(&[("x".to_string(), vec![a.clone()]), ("y".to_string(), vec![b.clone()])])
            .unwrap();
        let backward = fusion
            .fuse_query(&[("x".to_string(), vec![b]), ("y".to_string(), vec![a])])
            .unwrap();

        // equal scores: the later list supplies the identity
        assert!((forward[0].hit.start_time - 0.5).abs() < 1e-9);
        assert!((backward[0].hit.start_time - 0.0).abs() < 1e-9);
        // the labels are not consulted for scoring
        assert!((forward[0].score - backward[0].score).abs() < 1e-9);
        assert!(forward[0].hit.scores.contains_key("s1"));
    }
}
