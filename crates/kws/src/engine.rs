use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::error::{KwsError, Result};
use crate::hit::Hit;
use crate::index::TemporalIndex;
use crate::morph::{Decomposer, decompose_events, decompose_query};
use crate::oov::TermMapper;
use crate::pipeline::{Query, group_by_document};
use crate::timeline::TokenEvent;

/// Indexes many documents and runs keyword search over all of them on behalf
/// of one recognition system.
///
/// Each document's index is built independently on the blocking pool and
/// stored by document id; a document indexed again replaces its old index.
pub struct KwsEngine {
    /// Name attached to every produced hit's score.
    system: String,
    config: IndexConfig,
    /// Built indexes, keyed by document id.
    indexes: DashMap<String, Arc<TemporalIndex>>,
    /// Maps OOV query terms to in-vocabulary proxies.
    term_mapper: Option<Arc<dyn TermMapper + Send + Sync>>,
    /// Splits query terms into the units the recognizer emits.
    query_decomposer: Option<Arc<dyn Decomposer + Send + Sync>>,
    /// Splits recognized words before indexing.
    event_decomposer: Option<Arc<dyn Decomposer + Send + Sync>>,
}

impl KwsEngine {
    pub fn new(system: impl Into<String>, config: IndexConfig) -> Self {
        let system = system.into();
        info!(
            %system,
            silence_gap_secs = config.silence_gap_secs,
            "KWS engine created"
        );
        Self {
            system,
            config,
            indexes: DashMap::new(),
            term_mapper: None,
            query_decomposer: None,
            event_decomposer: None,
        }
    }

    pub fn with_term_mapper(mut self, mapper: Arc<dyn TermMapper + Send + Sync>) -> Self {
        self.term_mapper = Some(mapper);
        self
    }

    pub fn with_query_decomposer(mut self, decomposer: Arc<dyn Decomposer + Send + Sync>) -> Self {
        self.query_decomposer = Some(decomposer);
        self
    }

    pub fn with_event_decomposer(mut self, decomposer: Arc<dyn Decomposer + Send + Sync>) -> Self {
        self.event_decomposer = Some(decomposer);
        self
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    /// Returns the number of indexed documents.
    pub fn document_count(&self) -> usize {
        self.indexes.len()
    }

    pub fn index(&self, document_id: &str) -> Option<Arc<TemporalIndex>> {
        self.indexes.get(document_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Indexes every document found in `events` concurrently.
    ///
    /// Events of each document must already be time-sorted. A rejected
    /// document fails the whole batch and no index is stored. Returns the
    /// number of documents indexed.
    pub async fn index_documents(&self, events: Vec<TokenEvent>) -> anyhow::Result<usize> {
        let events = match &self.event_decomposer {
            Some(decomposer) => decompose_events(&events, decomposer.as_ref()),
            None => events,
        };

        let tasks = group_by_document(events)
            .into_iter()
            .map(|(document_id, events)| {
                let config = self.config.clone();
                tokio::task::spawn_blocking(move || {
                    let index = TemporalIndex::index_document(events, &config);
                    (document_id, index)
                })
            })
            .collect::<Vec<_>>();

        // nothing is stored unless every document of the batch builds
        let mut built = Vec::with_capacity(tasks.len());
        for joined in futures::future::join_all(tasks).await {
            let (document_id, index) = joined?;
            match index {
                Ok(index) => built.push((document_id, index)),
                Err(e) => {
                    warn!(%document_id, error = %e, "Document rejected, batch discarded");
                    return Err(e.into());
                }
            }
        }

        let indexed = built.len();
        for (document_id, index) in built {
            debug!(%document_id, slots = index.timeline().len(), "Index stored");
            self.indexes.insert(document_id, Arc::new(index));
        }

        info!(system = %self.system, documents = indexed, "Documents indexed");
        Ok(indexed)
    }

    /// Applies OOV mapping then decomposition to raw query tokens.
    pub fn prepare_query<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<String> {
        let mapped: Vec<String> = match &self.term_mapper {
            Some(mapper) => tokens
                .iter()
                .map(|token| mapper.closest_match(&token.as_ref().to_lowercase()))
                .collect(),
            None => tokens.iter().map(|t| t.as_ref().to_lowercase()).collect(),
        };
        match &self.query_decomposer {
            Some(decomposer) => decompose_query(mapped.as_slice(), decomposer.as_ref()),
            None => mapped,
        }
    }

    /// Searches every indexed document, in document id order.
    pub fn search<S: AsRef<str>>(&self, tokens: &[S]) -> Result<Vec<Hit>> {
        let query = self.prepare_query(tokens);
        if query.is_empty() {
            return Err(KwsError::InvalidQuery("query has no tokens".to_string()));
        }

        let mut documents: Vec<(String, Arc<TemporalIndex>)> = self
            .indexes
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        documents.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hits = Vec::new();
        for (_, index) in documents {
            hits.extend(index.search(query.as_slice(), &self.system)?);
        }
        Ok(hits)
    }

    /// Runs every query; the result maps query id to hits.
    pub fn search_queries(&self, queries: &[Query]) -> Result<BTreeMap<String, Vec<Hit>>> {
        let mut results = BTreeMap::new();
        for query in queries {
            let hits = self.search(query.tokens().as_slice())?;
            debug!(kwid = %query.kwid, hits = hits.len(), "Query searched");
            results.insert(query.kwid.clone(), hits);
        }
        info!(
            system = %self.system,
            queries = results.len(),
            hits = results.values().map(Vec::len).sum::<usize>(),
            "Search complete"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morph::Lexicon;

    fn events() -> Vec<TokenEvent> {
        vec![
            TokenEvent::new("doc-b", "1", 0.0, 1.0, "habari", 0.5),
            TokenEvent::new("doc-a", "1", 0.0, 1.0, "habari", 0.9),
            TokenEvent::new("doc-a", "1", 1.0, 1.0, "yako", 0.8),
        ]
    }

    #[tokio::test]
    async fn test_index_and_search_across_documents() {
        let engine = KwsEngine::new("sys", IndexConfig::default());
        assert_eq!(engine.index_documents(events()).await.unwrap(), 2);
        assert_eq!(engine.document_count(), 2);

        let hits = engine.search(&["habari"]).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document_id, "doc-a");
        assert_eq!(hits[1].document_id, "doc-b");

        let hits = engine.search(&["habari", "yako"]).unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].scores["sys"] - 0.72).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_reindex_replaces_document() {
        let engine = KwsEngine::new("sys", IndexConfig::default());
        engine.index_documents(events()).await.unwrap();
        engine
            .index_documents(vec![TokenEvent::new("doc-a", "1", 0.0, 1.0, "kwaheri", 0.9)])
            .await
            .unwrap();
        assert_eq!(engine.document_count(), 2);
        assert!(engine.search(&["yako"]).unwrap().is_empty());
        assert_eq!(engine.search(&["kwaheri"]).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unsorted_document_is_reported() {
        let engine = KwsEngine::new("sys", IndexConfig::default());
        let err = engine
            .index_documents(vec![
                TokenEvent::new("doc", "1", 4.0, 1.0, "a", 0.9),
                TokenEvent::new("doc", "1", 1.0, 1.0, "b", 0.9),
            ])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<KwsError>(),
            Some(KwsError::InconsistentTimeline { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_batch_stores_nothing() {
        let engine = KwsEngine::new("sys", IndexConfig::default());
        let result = engine
            .index_documents(vec![
                TokenEvent::new("doc-a", "1", 0.0, 1.0, "habari", 0.9),
                TokenEvent::new("doc-b", "1", 4.0, 1.0, "a", 0.9),
                TokenEvent::new("doc-b", "1", 1.0, 1.0, "b", 0.9),
            ])
            .await;
        assert!(result.is_err());
        assert_eq!(engine.document_count(), 0);
        assert!(engine.search(&["habari"]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_earlier_documents() {
        let engine = KwsEngine::new("sys", IndexConfig::default());
        engine.index_documents(events()).await.unwrap();
        let result = engine
            .index_documents(vec![
                TokenEvent::new("doc-a", "1", 0.0, 1.0, "kwaheri", 0.9),
                TokenEvent::new("doc-c", "1", 4.0, 1.0, "a", 0.9),
                TokenEvent::new("doc-c", "1", 1.0, 1.0, "b", 0.9),
            ])
            .await;
        assert!(result.is_err());
        assert_eq!(engine.document_count(), 2);
        assert_eq!(engine.search(&["habari", "yako"]).unwrap().len(), 1);
        assert!(engine.search(&["kwaheri"]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_unit_decomposition_on_both_sides() {
        let lexicon = Arc::new(Lexicon::parse_str("habarini habari\n"));
        let engine = KwsEngine::new("sys", IndexConfig::default())
            .with_event_decomposer(lexicon.clone())
            .with_query_decomposer(lexicon);
        engine
            .index_documents(vec![TokenEvent::new("doc", "1", 0.0, 1.0, "habarini", 0.8)])
            .await
            .unwrap();

        assert_eq!(engine.prepare_query(&["habarini"]), vec!["habari"]);
        let hits = engine.search(&["habarini"]).unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].scores["sys"] - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_decomposition_on_both_sides() {
        let lexicon = Arc::new(Lexicon::parse_str("weekend week end\n"));
        let engine = KwsEngine::new("sys", IndexConfig::default())
            .with_event_decomposer(lexicon.clone())
            .with_query_decomposer(lexicon);
        engine
            .index_documents(vec![TokenEvent::new("doc", "1", 0.0, 1.0, "weekend", 0.64)])
            .await
            .unwrap();

        assert_eq!(engine.prepare_query(&["Weekend"]), vec!["week", "end"]);
        let hits = engine.search(&["weekend"]).unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].duration - 1.0).abs() < 1e-9);
        assert!((hits[0].scores["sys"] - 0.64).abs() < 1e-6);
        assert_eq!(engine.search(&["end"]).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_queries_keyed_by_kwid() {
        let engine = KwsEngine::new("sys", IndexConfig::default());
        engine.index_documents(events()).await.unwrap();
        let queries = vec![
            Query {
                kwid: "KW-2".to_string(),
                text: "yako".to_string(),
            },
            Query {
                kwid: "KW-1".to_string(),
                text: "Habari Yako".to_string(),
            },
        ];
        let results = engine.search_queries(&queries).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results["KW-1"].len(), 1);
        assert_eq!(results["KW-2"].len(), 1);
    }
}
