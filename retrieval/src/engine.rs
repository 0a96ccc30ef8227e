//! Conditional retrieval fusion engine.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use sct_embeddings::{
    ChangeDetector, Embedding, EmbeddingError, EmbeddingProvider, IndexStatus, IndexStore,
    KnowledgeIndex, RetrievalResult, Throttle, call_with_retry,
};

use crate::config::{GenerationConfig, QueryConfig, SctConfig, SourceConfig};
use crate::error::{Result, RetrievalError};
use crate::followups::parse_followups;
use crate::generation::{CompletionRequest, GenerationProvider};
use crate::intent::IntentClassifier;
use crate::prompt::{
    answer_request, compact_reference, followup_request, limit_words, shorten_request,
    truncate_chars, word_count,
};

/// What happened to the secondary source for one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryStatus {
    /// The question was not binning-related.
    NotQueried,
    /// The secondary index was searched.
    Queried,
    /// The question was binning-related but no secondary index is loaded.
    Unavailable,
}

/// Retrieved context behind one answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusionContext {
    pub primary: Vec<RetrievalResult>,
    pub secondary: Vec<RetrievalResult>,
    pub intent_flag: bool,
    pub secondary_status: SecondaryStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusionAnswer {
    pub answer: String,
    pub context: FusionContext,
}

/// Response returned to UI and CLI callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub question: String,
    pub answer: String,
    pub primary_context: Vec<RetrievalResult>,
    pub secondary_context: Vec<RetrievalResult>,
    pub intent_flag: bool,
    pub secondary_status: SecondaryStatus,
    pub followups: Vec<String>,
}

/// Answers questions from a primary index, pulling in the secondary index
/// only for binning questions.
///
/// The engine holds immutable indexes and keeps no per-question state, so a
/// shared reference can serve concurrent questions.
pub struct FusionEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    classifier: IntentClassifier,
    primary: Arc<KnowledgeIndex>,
    secondary: Option<Arc<KnowledgeIndex>>,
    query: QueryConfig,
    generation: GenerationConfig,
}

impl FusionEngine {
    /// Create a new engine builder.
    pub fn builder() -> FusionEngineBuilder {
        FusionEngineBuilder::new()
    }

    /// Load committed indexes from the configured store.
    ///
    /// The primary index is required. A missing or unreadable secondary
    /// index is logged and binning questions then report
    /// [`SecondaryStatus::Unavailable`].
    pub async fn open(
        config: &SctConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Result<Self> {
        let store = IndexStore::new(&config.store_dir);
        let detector = ChangeDetector::new(store.clone());

        let primary = store.load(&config.sources.primary.tag).await?;
        warn_if_stale(&detector, &config.sources.primary).await;
        info!(
            "Loaded primary index {} ({} units, {} degraded)",
            primary.source_tag(),
            primary.len(),
            primary.degraded_count()
        );

        let secondary = match store.load(&config.sources.secondary.tag).await {
            Ok(index) => {
                warn_if_stale(&detector, &config.sources.secondary).await;
                info!(
                    "Loaded secondary index {} ({} units)",
                    index.source_tag(),
                    index.len()
                );
                Some(index)
            }
            Err(EmbeddingError::IndexMissing { source_tag }) => {
                warn!("No secondary index for {source_tag}; binning research disabled");
                None
            }
            Err(err) => {
                warn!("Secondary index unusable, continuing without it: {err}");
                None
            }
        };

        let mut builder = Self::builder()
            .with_embedder(embedder)
            .with_generator(generator)
            .with_primary(primary)
            .with_query_config(config.query.clone())
            .with_generation_config(config.generation.clone());
        if let Some(secondary) = secondary {
            builder = builder.with_secondary(secondary);
        }
        builder.build()
    }

    /// Whether a secondary index is loaded.
    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    /// Answer one question.
    pub async fn answer(&self, question: &str) -> Result<FusionAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RetrievalError::EmptyQuestion);
        }

        let decision = self.classifier.classify_detailed(question);
        let intent_flag = decision.activated;
        debug!(
            "Intent for {question:?}: activated={intent_flag} matched={:?}",
            decision.matched
        );

        let query_vector = Arc::new(self.embed_question(question).await?);

        let primary_search = search_blocking(
            Arc::clone(&self.primary),
            Arc::clone(&query_vector),
            self.query.top_k_primary,
        );
        let secondary_search = async {
            if !intent_flag {
                return Ok((Vec::new(), SecondaryStatus::NotQueried));
            }
            match &self.secondary {
                Some(index) => search_blocking(
                    Arc::clone(index),
                    Arc::clone(&query_vector),
                    self.query.top_k_secondary,
                )
                .await
                .map(|results| (results, SecondaryStatus::Queried)),
                None => Ok((Vec::new(), SecondaryStatus::Unavailable)),
            }
        };
        let (primary, secondary) = tokio::join!(primary_search, secondary_search);
        let primary = self.truncate(compact(primary?));
        let (secondary, secondary_status) = secondary?;
        let secondary = self.truncate(secondary);

        if secondary_status == SecondaryStatus::Unavailable {
            warn!("Binning question but no secondary index is loaded");
        }

        let request = answer_request(
            question,
            &primary,
            intent_flag.then_some(secondary.as_slice()),
            self.generation.temperature,
        );
        let answer = self.generate(&request).await?;
        let answer = match self.query.max_answer_words.filter(|&w| w > 0) {
            Some(max_words) => self.enforce_length(&request, answer, max_words).await,
            None => answer,
        };

        Ok(FusionAnswer {
            answer,
            context: FusionContext {
                primary,
                secondary,
                intent_flag,
                secondary_status,
            },
        })
    }

    /// Ask for three follow-up questions to an answered question.
    pub async fn suggest_followups(&self, question: &str, answer: &str) -> Result<Vec<String>> {
        let request = followup_request(question, answer, self.generation.followup_temperature);
        let text = self.generate(&request).await?;
        Ok(parse_followups(&text))
    }

    /// Answer a question and optionally suggest follow-ups.
    ///
    /// Follow-up failures are logged and produce an empty list.
    pub async fn query(&self, question: &str, with_followups: bool) -> Result<QueryResponse> {
        let FusionAnswer { answer, context } = self.answer(question).await?;

        let followups = if with_followups {
            match self.suggest_followups(question.trim(), &answer).await {
                Ok(followups) => followups,
                Err(err) => {
                    warn!("Follow-up suggestions failed: {err}");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Ok(QueryResponse {
            question: question.trim().to_string(),
            answer,
            primary_context: context.primary,
            secondary_context: context.secondary,
            intent_flag: context.intent_flag,
            secondary_status: context.secondary_status,
            followups,
        })
    }

    async fn embed_question(&self, question: &str) -> Result<Embedding> {
        let embedder = self.embedder.as_ref();
        let vector = call_with_retry(
            &self.generation.retry,
            &Throttle::disabled(),
            Duration::from_secs(self.query.embed_timeout_secs),
            move || embedder.embed(question),
            move || embedder.refresh_credentials(),
        )
        .await?;
        Ok(vector)
    }

    async fn generate(&self, request: &CompletionRequest) -> Result<String> {
        let generator = self.generator.as_ref();
        let text = call_with_retry(
            &self.generation.retry,
            &Throttle::disabled(),
            Duration::from_secs(self.generation.request_timeout_secs),
            move || generator.complete(request),
            move || generator.refresh_credentials(),
        )
        .await?;
        Ok(text.trim().to_string())
    }

    /// Send an over-long answer back for a shorter one, then cut whatever is
    /// still over `max_words`. A failed retry keeps the previous answer.
    async fn enforce_length(
        &self,
        request: &CompletionRequest,
        mut answer: String,
        max_words: usize,
    ) -> String {
        for attempt in 1..=self.query.length_retries {
            let words = word_count(&answer);
            if words <= max_words {
                return answer;
            }
            debug!("Answer has {words} words, asking for a shorter one (attempt {attempt})");
            let retry = shorten_request(request, &answer, max_words);
            match self.generate(&retry).await {
                Ok(shorter) => answer = shorter,
                Err(err) => {
                    warn!("Shorter answer request failed, cutting the previous one: {err}");
                    break;
                }
            }
        }
        limit_words(&answer, max_words)
    }

    fn truncate(&self, results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
        let max_chars = self.query.max_context_chars;
        results
            .into_iter()
            .map(|mut result| {
                result.text = truncate_chars(&result.text, max_chars);
                result
            })
            .collect()
    }
}

fn compact(results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    results
        .into_iter()
        .map(|mut result| {
            result.text = compact_reference(&result.text);
            result
        })
        .collect()
}

async fn search_blocking(
    index: Arc<KnowledgeIndex>,
    query: Arc<Embedding>,
    k: usize,
) -> Result<Vec<RetrievalResult>> {
    let results = tokio::task::spawn_blocking(move || index.search(&query, k))
        .await
        .map_err(|e| RetrievalError::Query(format!("search task failed: {e}")))??;
    Ok(results)
}

async fn warn_if_stale(detector: &ChangeDetector, source: &SourceConfig) {
    match detector.status(&source.tag, &source.path).await {
        Ok(IndexStatus::Stale) => warn!(
            "Index for {} is stale; run `sct embed` to rebuild from {}",
            source.tag,
            source.path.display()
        ),
        Ok(_) => {}
        Err(err) => debug!("Could not check freshness of {}: {err}", source.tag),
    }
}

/// Builder for [`FusionEngine`].
pub struct FusionEngineBuilder {
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    generator: Option<Arc<dyn GenerationProvider>>,
    classifier: IntentClassifier,
    primary: Option<KnowledgeIndex>,
    secondary: Option<KnowledgeIndex>,
    query: QueryConfig,
    generation: GenerationConfig,
}

impl FusionEngineBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            embedder: None,
            generator: None,
            classifier: IntentClassifier::new(),
            primary: None,
            secondary: None,
            query: QueryConfig::default(),
            generation: GenerationConfig::default(),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn GenerationProvider>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_classifier(mut self, classifier: IntentClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_primary(mut self, index: KnowledgeIndex) -> Self {
        self.primary = Some(index);
        self
    }

    pub fn with_secondary(mut self, index: KnowledgeIndex) -> Self {
        self.secondary = Some(index);
        self
    }

    pub fn with_query_config(mut self, query: QueryConfig) -> Self {
        self.query = query;
        self
    }

    pub fn with_generation_config(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    /// Build the engine.
    ///
    /// Fails when a provider or the primary index is missing, or when the
    /// indexes disagree with each other or with the embedder on dimension.
    pub fn build(self) -> Result<FusionEngine> {
        let embedder = self
            .embedder
            .ok_or_else(|| RetrievalError::Config("no embedding provider".to_string()))?;
        let generator = self
            .generator
            .ok_or_else(|| RetrievalError::Config("no generation provider".to_string()))?;
        let primary = self
            .primary
            .ok_or_else(|| RetrievalError::Config("no primary index".to_string()))?;

        let expected = embedder.dimension();
        for index in std::iter::once(&primary).chain(self.secondary.as_ref()) {
            let dimension = index.vectors().dimension();
            if !index.is_empty() && dimension != expected {
                return Err(RetrievalError::Config(format!(
                    "index {} has dimension {dimension} but {} produces {expected}",
                    index.source_tag(),
                    embedder.name()
                )));
            }
        }

        Ok(FusionEngine {
            embedder,
            generator,
            classifier: self.classifier,
            primary: Arc::new(primary),
            secondary: self.secondary.map(Arc::new),
            query: self.query,
            generation: self.generation,
        })
    }
}

impl Default for FusionEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use sct_corpus::KnowledgeUnit;
    use sct_embeddings::testing::VocabularyEmbedder;
    use sct_embeddings::{EmbeddingRecord, RemoteError};

    struct EchoGenerator;

    #[async_trait]
    impl GenerationProvider for EchoGenerator {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> std::result::Result<String, RemoteError> {
            Ok(request.user.clone())
        }
    }

    fn index(tag: &str, embedder: &VocabularyEmbedder, texts: &[&str]) -> KnowledgeIndex {
        let units: Vec<_> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| KnowledgeUnit::new(format!("{tag}-{i}"), *text, tag))
            .collect();
        let records = units
            .iter()
            .map(|u| EmbeddingRecord::new(u.id.clone(), embedder.vector_for(&u.text)))
            .collect();
        KnowledgeIndex::build(tag, &units, records).unwrap()
    }

    #[test]
    fn test_build_requires_primary() {
        let err = FusionEngine::builder()
            .with_embedder(Arc::new(VocabularyEmbedder::new(["bin"])))
            .with_generator(Arc::new(EchoGenerator))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, RetrievalError::Config(_)));
    }

    #[test]
    fn test_build_rejects_dimension_mismatch() {
        let small = VocabularyEmbedder::new(["bin"]);
        let primary = index("ontology", &small, &["bin"]);
        let err = FusionEngine::builder()
            .with_embedder(Arc::new(VocabularyEmbedder::new(["bin", "wafer"])))
            .with_generator(Arc::new(EchoGenerator))
            .with_primary(primary)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, RetrievalError::Config(_)));
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let embedder = VocabularyEmbedder::new(["bin"]);
        let primary = index("ontology", &embedder, &["bin"]);
        let engine = FusionEngine::builder()
            .with_embedder(Arc::new(embedder))
            .with_generator(Arc::new(EchoGenerator))
            .with_primary(primary)
            .build()
            .unwrap();

        let err = engine.answer("   ").await.unwrap_err();
        assert!(matches!(err, RetrievalError::EmptyQuestion));
    }

    #[tokio::test]
    async fn test_answer_word_limit_applies() {
        let embedder = VocabularyEmbedder::new(["bin"]);
        let primary = index("ontology", &embedder, &["bin"]);
        let engine = FusionEngine::builder()
            .with_embedder(Arc::new(embedder))
            .with_generator(Arc::new(EchoGenerator))
            .with_primary(primary)
            .with_query_config(QueryConfig {
                max_answer_words: Some(3),
                length_retries: 0,
                ..QueryConfig::default()
            })
            .build()
            .unwrap();

        let answer = engine.answer("What is a bin?").await.unwrap();
        assert_eq!(answer.answer, "Digital Reference Context:...");
        assert!(!engine.has_secondary());
        assert_eq!(answer.context.secondary_status, SecondaryStatus::Unavailable);
    }

    #[tokio::test]
    async fn test_zero_word_cap_leaves_answer_whole() {
        let embedder = VocabularyEmbedder::new(["bin"]);
        let primary = index("ontology", &embedder, &["bin"]);
        let engine = FusionEngine::builder()
            .with_embedder(Arc::new(embedder))
            .with_generator(Arc::new(EchoGenerator))
            .with_primary(primary)
            .with_query_config(QueryConfig {
                max_answer_words: Some(0),
                ..QueryConfig::default()
            })
            .build()
            .unwrap();

        let answer = engine.answer("What is a bin?").await.unwrap();
        assert!(answer.answer.starts_with("Digital Reference Context:\n[ontology-0]"));
        assert!(answer.answer.ends_with("concise answer."));
    }

    #[tokio::test]
    async fn test_primary_entries_are_compacted() {
        let embedder = VocabularyEmbedder::new(["bin"]);
        let primary = index(
            "ontology",
            &embedder,
            &["bin subClassOf TestStep | bin hasOutput BinMap"],
        );
        let engine = FusionEngine::builder()
            .with_embedder(Arc::new(embedder))
            .with_generator(Arc::new(EchoGenerator))
            .with_primary(primary)
            .build()
            .unwrap();

        let answer = engine.answer("What is a bin?").await.unwrap();
        assert_eq!(answer.context.primary[0].text, "bin hasOutput BinMap");
        assert!(answer.answer.contains("[ontology-0]\nbin hasOutput BinMap"));
        assert!(!answer.answer.contains("subClassOf"));
    }
}
