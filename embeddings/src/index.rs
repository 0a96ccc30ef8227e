//! Exact nearest-neighbour index over unit-normalized vectors.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use sct_corpus::KnowledgeUnit;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::similarity::{dot_product, normalize};

/// Embedding of one knowledge unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Id of the embedded unit.
    pub unit_id: String,

    /// The raw vector returned by the provider.
    pub vector: Embedding,

    /// Set when embedding failed and `vector` is the zero placeholder.
    #[serde(default)]
    pub degraded: bool,
}

impl EmbeddingRecord {
    pub fn new(unit_id: impl Into<String>, vector: Embedding) -> Self {
        Self {
            unit_id: unit_id.into(),
            vector,
            degraded: false,
        }
    }

    /// Zero-vector placeholder for a unit that could not be embedded.
    pub fn degraded(unit_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            unit_id: unit_id.into(),
            vector: vec![0.0; dimension],
            degraded: true,
        }
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// Position of the vector in the index.
    pub position: usize,

    /// Id of the unit at that position.
    pub unit_id: String,

    /// Cosine similarity, clamped to `[0, 1]`.
    pub score: f32,
}

/// Flat inner-product index.
///
/// Vectors are normalized on build, so inner product equals cosine
/// similarity. Ties rank by insertion position.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    ids: Vec<String>,
    vectors: Vec<Embedding>,
}

impl VectorIndex {
    /// Build an index from records, all of the same dimension.
    pub fn build(records: Vec<EmbeddingRecord>) -> Result<Self> {
        let dimension = records.first().map(|r| r.vector.len()).unwrap_or(0);
        let mut ids = Vec::with_capacity(records.len());
        let mut vectors = Vec::with_capacity(records.len());

        for record in records {
            if record.vector.len() != dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dimension,
                    actual: record.vector.len(),
                });
            }
            let mut vector = record.vector;
            normalize(&mut vector);
            ids.push(record.unit_id);
            vectors.push(vector);
        }

        debug!("Built vector index with {} entries", ids.len());

        Ok(Self {
            dimension,
            ids,
            vectors,
        })
    }

    /// Rebuild an index from persisted, already-normalized vectors.
    pub(crate) fn from_parts(
        dimension: usize,
        ids: Vec<String>,
        vectors: Vec<Embedding>,
    ) -> Result<Self> {
        if ids.len() != vectors.len() {
            return Err(EmbeddingError::MisalignedIndex(format!(
                "{} ids for {} vectors",
                ids.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }
        Ok(Self {
            dimension,
            ids,
            vectors,
        })
    }

    /// Top-`k` entries by similarity to `query`.
    ///
    /// Returns all entries when `k` exceeds the index size. Non-finite scores
    /// count as zero.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        if self.ids.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut query = query.to_vec();
        normalize(&mut query);

        let mut scored = Vec::with_capacity(self.vectors.len());
        for (position, vector) in self.vectors.iter().enumerate() {
            let score = dot_product(&query, vector)?;
            let score = if score.is_finite() {
                score.clamp(0.0, 1.0)
            } else {
                0.0
            };
            scored.push((position, OrderedFloat(score)));
        }

        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(position, score)| Hit {
                position,
                unit_id: self.ids[position].clone(),
                score: score.0,
            })
            .collect())
    }

    /// Vector length, zero for an empty index.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Get the number of entries in the index.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Unit ids in position order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Normalized vectors in position order.
    pub fn vectors(&self) -> &[Embedding] {
        &self.vectors
    }
}

/// Text and metadata stored alongside each indexed vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub id: String,
    pub text: String,
    /// Source the unit was loaded from. Empty in indexes written before the
    /// tag was recorded.
    #[serde(default)]
    pub source_tag: String,
    #[serde(default)]
    pub degraded: bool,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// A retrieved unit with its score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub unit_id: String,
    pub score: f32,
    pub text: String,
    pub degraded: bool,
}

/// Searchable index for one source: vectors plus the documents they embed.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeIndex {
    source_tag: String,
    vectors: VectorIndex,
    documents: Vec<IndexedDocument>,
}

impl KnowledgeIndex {
    /// Build from units and their embeddings, which must be in the same order.
    pub fn build(
        source_tag: impl Into<String>,
        units: &[KnowledgeUnit],
        records: Vec<EmbeddingRecord>,
    ) -> Result<Self> {
        if units.len() != records.len() {
            return Err(EmbeddingError::MisalignedIndex(format!(
                "{} units for {} embeddings",
                units.len(),
                records.len()
            )));
        }

        let mut documents = Vec::with_capacity(units.len());
        for (unit, record) in units.iter().zip(records.iter()) {
            if unit.id != record.unit_id {
                return Err(EmbeddingError::MisalignedIndex(format!(
                    "unit {} paired with embedding for {}",
                    unit.id, record.unit_id
                )));
            }
            documents.push(IndexedDocument {
                id: unit.id.clone(),
                text: unit.text.clone(),
                source_tag: unit.source_tag.clone(),
                degraded: record.degraded,
                metadata: unit.metadata.clone(),
            });
        }

        Self::from_parts(source_tag, VectorIndex::build(records)?, documents)
    }

    /// Pair a vector index with its documents.
    pub fn from_parts(
        source_tag: impl Into<String>,
        vectors: VectorIndex,
        documents: Vec<IndexedDocument>,
    ) -> Result<Self> {
        if vectors.len() != documents.len() {
            return Err(EmbeddingError::MisalignedIndex(format!(
                "{} vectors for {} documents",
                vectors.len(),
                documents.len()
            )));
        }
        if let Some((id, doc)) = vectors
            .ids()
            .iter()
            .zip(documents.iter())
            .find(|(id, doc)| **id != doc.id)
        {
            return Err(EmbeddingError::MisalignedIndex(format!(
                "vector {id} paired with document {}",
                doc.id
            )));
        }

        Ok(Self {
            source_tag: source_tag.into(),
            vectors,
            documents,
        })
    }

    /// Top-`k` documents for a query vector.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalResult>> {
        let hits = self.vectors.search(query, k)?;
        Ok(hits
            .into_iter()
            .map(|hit| {
                let document = &self.documents[hit.position];
                RetrievalResult {
                    unit_id: hit.unit_id,
                    score: hit.score,
                    text: document.text.clone(),
                    degraded: document.degraded,
                }
            })
            .collect())
    }

    pub fn source_tag(&self) -> &str {
        &self.source_tag
    }

    pub fn vectors(&self) -> &VectorIndex {
        &self.vectors
    }

    pub fn documents(&self) -> &[IndexedDocument] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Number of documents carrying a placeholder vector.
    pub fn degraded_count(&self) -> usize {
        self.documents.iter().filter(|d| d.degraded).count()
    }
}
