//! Deterministic providers for tests.
//!
//! [`VocabularyEmbedder`] maps each vocabulary word to its own dimension and
//! counts occurrences, so two texts are similar exactly when they share
//! vocabulary words. Failures can be scripted per input text.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::Embedding;
use crate::error::RemoteError;
use crate::provider::EmbeddingProvider;

/// Bag-of-words embedder over a fixed vocabulary.
pub struct VocabularyEmbedder {
    vocabulary: Vec<String>,
    calls: AtomicUsize,
    refreshes: AtomicUsize,
    revoke_after: Option<usize>,
    scripted: Mutex<HashMap<String, VecDeque<RemoteError>>>,
    always_failing: HashMap<String, RemoteError>,
    short_vectors: HashSet<String>,
    seen: Mutex<Vec<String>>,
}

impl VocabularyEmbedder {
    pub fn new<I, S>(vocabulary: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            vocabulary: vocabulary
                .into_iter()
                .map(|w| w.into().to_lowercase())
                .collect(),
            calls: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            revoke_after: None,
            scripted: Mutex::new(HashMap::new()),
            always_failing: HashMap::new(),
            short_vectors: HashSet::new(),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Reject every call after the first `calls` with an auth error that no
    /// refresh fixes.
    pub fn revoke_after(mut self, calls: usize) -> Self {
        self.revoke_after = Some(calls);
        self
    }

    /// Fail the next calls for `text` with `errors`, in order.
    pub fn fail_next(self, text: impl Into<String>, errors: Vec<RemoteError>) -> Self {
        if let Ok(mut scripted) = self.scripted.lock() {
            scripted.entry(text.into()).or_default().extend(errors);
        }
        self
    }

    /// Fail every call for `text`.
    pub fn fail_always(mut self, text: impl Into<String>, error: RemoteError) -> Self {
        self.always_failing.insert(text.into(), error);
        self
    }

    /// Answer `text` with a vector one dimension short.
    pub fn short_vector_for(mut self, text: impl Into<String>) -> Self {
        self.short_vectors.insert(text.into());
        self
    }

    /// Embed without counting or failing.
    pub fn vector_for(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0; self.vocabulary.len()];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            if let Some(position) = self.vocabulary.iter().position(|w| *w == token) {
                vector[position] += 1.0;
            }
        }
        vector
    }

    /// Number of `embed` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of credential refreshes so far.
    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Texts passed to `embed`, in call order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EmbeddingProvider for VocabularyEmbedder {
    fn name(&self) -> &str {
        "vocabulary"
    }

    fn dimension(&self) -> usize {
        self.vocabulary.len()
    }

    async fn embed(&self, text: &str) -> Result<Embedding, RemoteError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(text.to_string());
        }

        if self.revoke_after.is_some_and(|limit| call > limit) {
            return Err(RemoteError::Auth("credential revoked".to_string()));
        }
        if let Some(error) = self.always_failing.get(text) {
            return Err(error.clone());
        }
        let scripted = self
            .scripted
            .lock()
            .ok()
            .and_then(|mut s| s.get_mut(text).and_then(VecDeque::pop_front));
        if let Some(error) = scripted {
            return Err(error);
        }

        let mut vector = self.vector_for(text);
        if self.short_vectors.contains(text) {
            vector.pop();
        }
        Ok(vector)
    }

    async fn refresh_credentials(&self) -> Result<(), RemoteError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
