pub mod config;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod hit;
pub mod index;
pub mod morph;
pub mod normalize;
pub mod oov;
pub mod pipeline;
pub mod timeline;

pub use config::{FusionConfig, IndexConfig, NormalizationConfig};
pub use engine::KwsEngine;
pub use error::{KwsError, Result};
pub use fusion::{FusedHit, FusionEngine, FusionMethod, SystemRegistry, combine_score};
pub use hit::{Hit, merge_list, merge_pair};
pub use index::TemporalIndex;
pub use morph::{Decomposer, Lexicon};
pub use normalize::{NormalizationMethod, normalize_scores};
pub use oov::{ConfusionMatrix, GraphemeMapper, TermMapper};
pub use timeline::{Slot, Timeline, TokenEvent};

/// Rounds half away from zero to `decimals` places.
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
