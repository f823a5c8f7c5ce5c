use crate::config::EPSILON;
use crate::error::{KwsError, Result};
use crate::round_to;

/// Per-query score renormalization applied after fusion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NormalizationMethod {
    /// `s^alpha / sum(s^alpha)`.
    SumToOne { alpha: f64 },
    /// Keyword-specific thresholding over `total_duration` seconds of speech.
    KeywordSpecificThreshold {
        alpha: f64,
        total_duration: f64,
        beta: f64,
    },
    /// `s^(1 / mean hit duration)`.
    QueryLength,
}

impl NormalizationMethod {
    /// Resolves a method name ("STO", "KST", "QL") with its parameters.
    pub fn from_parts(name: &str, alpha: f64, beta: f64, total_duration: f64) -> Result<Self> {
        let method = match name.to_ascii_uppercase().as_str() {
            "STO" => NormalizationMethod::SumToOne { alpha },
            "KST" => NormalizationMethod::KeywordSpecificThreshold {
                alpha,
                total_duration,
                beta,
            },
            "QL" => NormalizationMethod::QueryLength,
            _ => return Err(KwsError::UnsupportedMethod(name.to_string())),
        };
        method.validate()?;
        Ok(method)
    }

    fn validate(&self) -> Result<()> {
        match *self {
            NormalizationMethod::SumToOne { alpha } if alpha <= 0.0 => Err(
                KwsError::InvalidParameter(format!("alpha must be positive, got {alpha}")),
            ),
            NormalizationMethod::KeywordSpecificThreshold {
                alpha,
                total_duration,
                ..
            } if alpha <= 0.0 || total_duration <= 0.0 => Err(KwsError::InvalidParameter(
                format!("alpha and total duration must be positive, got {alpha} and {total_duration}"),
            )),
            _ => Ok(()),
        }
    }
}

/// A scored detection as seen by normalization.
pub trait Scored {
    fn score(&self) -> f64;
    fn set_score(&mut self, score: f64);
    fn duration(&self) -> f64;
}

impl Scored for crate::fusion::FusedHit {
    fn score(&self) -> f64 {
        self.score
    }

    fn set_score(&mut self, score: f64) {
        self.score = score;
    }

    fn duration(&self) -> f64 {
        self.hit.duration
    }
}

/// Rewrites the scores of one query's hit list in place.
///
/// Empty lists are left untouched. Results are rounded to 6 decimals.
pub fn normalize_scores<H: Scored>(hits: &mut [H], method: NormalizationMethod) -> Result<()> {
    method.validate()?;
    if hits.is_empty() {
        return Ok(());
    }

    match method {
        NormalizationMethod::SumToOne { alpha } => {
            let factor = hits.iter().map(|h| h.score().powf(alpha)).sum::<f64>() + EPSILON;
            for hit in hits.iter_mut() {
                hit.set_score(round_to(hit.score().powf(alpha) / factor, 6));
            }
        }
        NormalizationMethod::KeywordSpecificThreshold {
            alpha,
            total_duration,
            beta,
        } => {
            let posterior_sum: f64 = hits.iter().map(Scored::score).sum();
            let threshold = (beta * alpha * posterior_sum
                / (total_duration + (beta - 1.0) * alpha * posterior_sum))
                .ln();
            for hit in hits.iter_mut() {
                hit.set_score(round_to(hit.score().powf(-1.0 / threshold), 6));
            }
        }
        NormalizationMethod::QueryLength => {
            let mean_duration =
                hits.iter().map(Scored::duration).sum::<f64>() / hits.len() as f64 + EPSILON;
            for hit in hits.iter_mut() {
                hit.set_score(round_to(hit.score().powf(1.0 / mean_duration), 6));
            }
        }
    }
    Ok(())
}
