use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::IndexConfig;
use crate::error::{KwsError, Result};

/// One recognized word or subword with its time alignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenEvent {
    pub document_id: String,
    pub channel_id: String,
    /// Seconds from the start of the document.
    pub start_time: f64,
    pub duration: f64,
    /// Always `start_time + duration`.
    pub end_time: f64,
    /// Lowercased token text.
    pub text: String,
    /// Posterior probability in [0, 1].
    pub confidence: f64,
}

impl TokenEvent {
    pub fn new(
        document_id: impl Into<String>,
        channel_id: impl Into<String>,
        start_time: f64,
        duration: f64,
        text: &str,
        confidence: f64,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            channel_id: channel_id.into(),
            start_time,
            duration,
            end_time: start_time + duration,
            text: text.to_lowercase(),
            confidence,
        }
    }
}

/// A timeline position: either a recognized token or a pause.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Token(TokenEvent),
    Silence,
}

impl Slot {
    pub fn as_token(&self) -> Option<&TokenEvent> {
        match self {
            Slot::Token(event) => Some(event),
            Slot::Silence => None,
        }
    }

    pub fn is_silence(&self) -> bool {
        matches!(self, Slot::Silence)
    }
}

/// A document's recognized speech as ordered slots, with silence markers
/// between tokens separated by a long pause.
///
/// Silence markers are never adjacent and never lead or trail the timeline.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    slots: Vec<Slot>,
    /// Token text -> ascending slot positions.
    occurrences: HashMap<String, Vec<usize>>,
}

impl Timeline {
    /// Builds a timeline from events already sorted by start time.
    ///
    /// An event starting before its predecessor is rejected with
    /// [`KwsError::InconsistentTimeline`].
    pub fn build(events: Vec<TokenEvent>, config: &IndexConfig) -> Result<Self> {
        let mut slots = Vec::with_capacity(events.len());
        let mut occurrences: HashMap<String, Vec<usize>> = HashMap::new();
        let mut previous: Option<(f64, f64)> = None;

        for mut event in events {
            // events built by struct literal or serde may carry mixed case
            event.text = event.text.to_lowercase();
            if let Some((previous_start, previous_end)) = previous {
                if event.start_time < previous_start {
                    return Err(KwsError::InconsistentTimeline {
                        document_id: event.document_id,
                        previous_start,
                        start_time: event.start_time,
                    });
                }
                if event.start_time - previous_end > config.silence_gap_secs {
                    slots.push(Slot::Silence);
                }
            }
            previous = Some((event.start_time, event.end_time));

            occurrences
                .entry(event.text.clone())
                .or_default()
                .push(slots.len());
            slots.push(Slot::Token(event));
        }

        Ok(Self { slots, occurrences })
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot positions holding `text`, in timeline order.
    pub fn positions(&self, text: &str) -> &[usize] {
        self.occurrences
            .get(text)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn occurrences(&self) -> &HashMap<String, Vec<usize>> {
        &self.occurrences
    }

    pub fn silence_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_silence()).count()
    }
}
