use tracing::debug;

use crate::config::IndexConfig;
use crate::error::{KwsError, Result};
use crate::hit::Hit;
use crate::timeline::{Slot, Timeline, TokenEvent};

/// Exact phrase search over one document's timeline.
///
/// Rebuilt wholesale for every document; there is no incremental update.
#[derive(Debug, Clone, Default)]
pub struct TemporalIndex {
    timeline: Timeline,
}

impl TemporalIndex {
    /// Indexes one document's events, which must be sorted by start time.
    pub fn index_document(events: Vec<TokenEvent>, config: &IndexConfig) -> Result<Self> {
        let timeline = Timeline::build(events, config)?;
        debug!(
            slots = timeline.len(),
            silences = timeline.silence_count(),
            vocabulary = timeline.occurrences().len(),
            "Document indexed"
        );
        Ok(Self { timeline })
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Finds every exact occurrence of `query` that is not interrupted by a
    /// silence marker.
    ///
    /// Each match becomes a hit spanning the first token's start to the last
    /// token's end, scored by `system` with the product of the matched
    /// confidences. Overlapping matches are all returned.
    pub fn search<S: AsRef<str>>(&self, query: &[S], system: &str) -> Result<Vec<Hit>> {
        let tokens = validate_query(query)?;
        let slots = self.timeline.slots();

        let hits = self
            .timeline
            .positions(&tokens[0])
            .iter()
            .filter_map(|&start| slots.get(start..start + tokens.len()))
            .filter_map(|window| match_window(window, &tokens))
            .map(|matched| to_hit(&matched, system))
            .collect();

        Ok(hits)
    }
}

fn validate_query<S: AsRef<str>>(query: &[S]) -> Result<Vec<String>> {
    if query.is_empty() {
        return Err(KwsError::InvalidQuery("query has no tokens".to_string()));
    }
    query
        .iter()
        .map(|token| {
            let token = token.as_ref().trim();
            if token.is_empty() || token.contains(char::is_whitespace) {
                Err(KwsError::InvalidQuery(format!("malformed token '{token}'")))
            } else {
                Ok(token.to_lowercase())
            }
        })
        .collect()
}

/// Returns the window's events when every slot is a token equal to the
/// corresponding query token. Any silence slot rejects the window.
fn match_window<'a>(window: &'a [Slot], tokens: &[String]) -> Option<Vec<&'a TokenEvent>> {
    window
        .iter()
        .zip(tokens)
        .map(|(slot, token)| match slot {
            Slot::Token(event) if event.text == *token => Some(event),
            _ => None,
        })
        .collect()
}

fn to_hit(matched: &[&TokenEvent], system: &str) -> Hit {
    let first = matched[0];
    let last = matched[matched.len() - 1];
    let score = matched.iter().map(|event| event.confidence).product::<f64>();
    Hit::new(
        first.document_id.clone(),
        first.channel_id.clone(),
        first.start_time,
        last.end_time - first.start_time,
        system,
        score,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: &str, start: f64, duration: f64, confidence: f64) -> TokenEvent {
        TokenEvent::new("doc", "1", start, duration, text, confidence)
    }

    fn index(events: Vec<TokenEvent>) -> TemporalIndex {
        TemporalIndex::index_document(events, &IndexConfig::default()).unwrap()
    }

    #[test]
    fn test_two_word_phrase() {
        let idx = index(vec![event("w1", 0.0, 1.0, 0.9), event("w2", 1.0, 1.0, 0.8)]);
        let hits = idx.search(&["w1", "w2"], "sys").unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].start_time - 0.0).abs() < 1e-9);
        assert!((hits[0].duration - 2.0).abs() < 1e-9);
        assert!((hits[0].scores["sys"] - 0.72).abs() < 1e-9);
    }

    #[test]
    fn test_single_token_hits_every_occurrence() {
        let idx = index(vec![
            event("w1", 0.0, 1.0, 1.0),
            event("w2", 1.0, 1.0, 0.4),
            event("w1", 10.0, 1.0, 0.6),
        ]);
        let hits = idx.search(&["w1"], "sys").unwrap();
        assert_eq!(hits.len(), idx.timeline().positions("w1").len());
        assert!((hits[0].scores["sys"] - 1.0).abs() < 1e-9);
        assert!((hits[1].start_time - 10.0).abs() < 1e-9);
        assert!((hits[1].scores["sys"] - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_phrase_across_silence_rejected() {
        let idx = index(vec![event("w1", 0.0, 1.0, 0.9), event("w2", 5.0, 1.0, 0.8)]);
        assert!(idx.search(&["w1", "w2"], "sys").unwrap().is_empty());
    }

    #[test]
    fn test_window_past_end_discarded() {
        let idx = index(vec![event("w2", 0.0, 1.0, 0.9), event("w1", 1.0, 1.0, 0.8)]);
        assert!(idx.search(&["w1", "w2"], "sys").unwrap().is_empty());
    }

    #[test]
    fn test_missing_token_yields_no_hits() {
        let idx = index(vec![event("w1", 0.0, 1.0, 0.9)]);
        assert!(idx.search(&["nothing"], "sys").unwrap().is_empty());
    }

    #[test]
    fn test_overlapping_matches_all_emitted() {
        let idx = index(vec![
            event("la", 0.0, 0.5, 0.5),
            event("la", 0.5, 0.5, 0.5),
            event("la", 1.0, 0.5, 0.5),
        ]);
        let hits = idx.search(&["la", "la"], "sys").unwrap();
        assert_eq!(hits.len(), 2);
        assert!((hits[1].start_time - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_query_is_case_insensitive() {
        let idx = index(vec![event("Jambo", 0.0, 1.0, 0.9)]);
        assert_eq!(idx.search(&["JAMBO"], "sys").unwrap().len(), 1);
    }

    #[test]
    fn test_mixed_case_deserialized_event_matches() {
        let json = r#"{"document_id":"doc","channel_id":"1","start_time":0.0,
            "duration":1.0,"end_time":1.0,"text":"Habari","confidence":0.8}"#;
        let literal: TokenEvent = serde_json::from_str(json).unwrap();
        let idx = index(vec![literal, event("yako", 1.0, 1.0, 0.5)]);
        let hits = idx.search(&["habari", "yako"], "sys").unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].scores["sys"] - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_empty_query_rejected() {
        let idx = index(vec![event("w1", 0.0, 1.0, 0.9)]);
        let empty: [&str; 0] = [];
        assert!(matches!(
            idx.search(&empty, "sys"),
            Err(KwsError::InvalidQuery(_))
        ));
        assert!(matches!(
            idx.search(&["w1", " "], "sys"),
            Err(KwsError::InvalidQuery(_))
        ));
    }
}
