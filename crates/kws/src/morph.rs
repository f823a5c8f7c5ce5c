use std::collections::HashMap;
use std::path::Path;

use crate::round_to;
use crate::timeline::TokenEvent;

/// Splits a token into morphological units.
pub trait Decomposer {
    /// Returns the units of `token`, or the token itself when it has no
    /// known decomposition.
    fn decompose(&self, token: &str) -> Vec<String>;
}

/// Word -> morph sequence mapping read from a dictionary file.
///
/// Each line is `word unit1 unit2 ...`; lines without units are ignored.
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    entries: HashMap<String, Vec<String>>,
}

impl Lexicon {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!("Failed to read lexicon '{}': {}", path.as_ref().display(), e)
        })?;
        Ok(Self::parse_str(&content))
    }

    pub fn parse_str(content: &str) -> Self {
        let entries = content
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let word = fields.next()?;
                let units: Vec<String> = fields.map(str::to_string).collect();
                (!units.is_empty()).then(|| (word.to_string(), units))
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Decomposer for Lexicon {
    fn decompose(&self, token: &str) -> Vec<String> {
        self.entries
            .get(token)
            .cloned()
            .unwrap_or_else(|| vec![token.to_string()])
    }
}

/// Splits one recognized word into its units.
///
/// A word of duration `T` and posterior `p` split into `n` units yields
/// consecutive units of duration `T/n` (2 decimals) and posterior `p^(1/n)`
/// (6 decimals), so the sequence keeps the word's span and joint posterior.
/// A single-unit entry rewrites the word in place.
pub fn decompose_event(event: &TokenEvent, decomposer: &dyn Decomposer) -> Vec<TokenEvent> {
    let units = decomposer.decompose(&event.text);
    match units.as_slice() {
        [] => return vec![event.clone()],
        [unit] if *unit == event.text => return vec![event.clone()],
        _ => {}
    }

    let n = units.len() as f64;
    let duration = round_to(event.duration / n, 2);
    let confidence = round_to(event.confidence.powf(1.0 / n), 6);

    units
        .iter()
        .enumerate()
        .map(|(i, unit)| {
            TokenEvent::new(
                event.document_id.clone(),
                event.channel_id.clone(),
                event.start_time + i as f64 * duration,
                duration,
                unit,
                confidence,
            )
        })
        .collect()
}

/// Decomposes a whole event stream, preserving order.
pub fn decompose_events(events: &[TokenEvent], decomposer: &dyn Decomposer) -> Vec<TokenEvent> {
    events
        .iter()
        .flat_map(|event| decompose_event(event, decomposer))
        .collect()
}

/// Lowercases and decomposes every query token.
pub fn decompose_query<S: AsRef<str>>(tokens: &[S], decomposer: &dyn Decomposer) -> Vec<String> {
    tokens
        .iter()
        .flat_map(|token| decomposer.decompose(&token.as_ref().to_lowercase()))
        .collect()
}
