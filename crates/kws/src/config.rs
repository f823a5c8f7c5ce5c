use serde::{Deserialize, Serialize};

use crate::fusion::FusionMethod;
use crate::normalize::NormalizationMethod;

/// Additive guard used wherever a sum may be zero.
pub const EPSILON: f64 = 1e-6;

/// Configuration for building per-document timelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Gap in seconds between two consecutive tokens above which a silence
    /// marker is inserted. Phrases never match across such a marker.
    pub silence_gap_secs: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            silence_gap_secs: 0.5,
        }
    }
}

/// Configuration for multi-system hit fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Two hits are the same event when their intervals overlap by more than
    /// this fraction of the shorter duration.
    pub overlap_ratio: f64,
    /// Score combination formula.
    pub method: FusionMethod,
    /// Guard added to denominators (e.g. total system quality).
    pub epsilon: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            overlap_ratio: 0.3,
            method: FusionMethod::Mnz,
            epsilon: EPSILON,
        }
    }
}

/// Configuration for per-query score renormalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    /// "STO", "KST" or "QL".
    pub method: String,
    /// Exponent for sum-to-one, scale for keyword-specific thresholding.
    pub alpha: f64,
    /// False-alarm weight for keyword-specific thresholding.
    pub beta: f64,
    /// Total searched speech duration in seconds (keyword-specific thresholding).
    pub total_duration_secs: f64,
}

impl NormalizationConfig {
    /// Resolves the configured method name and parameters.
    pub fn method(&self) -> crate::Result<NormalizationMethod> {
        NormalizationMethod::from_parts(&self.method, self.alpha, self.beta, self.total_duration_secs)
    }
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            method: "STO".to_string(),
            alpha: 1.0,
            beta: 999.9,
            total_duration_secs: 10.0 * 60.0 * 60.0,
        }
    }
}
