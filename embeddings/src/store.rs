//! On-disk layout of committed indexes.
//!
//! ```text
//! <root>/<source_tag>/
//!   fingerprint.json      commit point: names the active generation
//!   checkpoint.json       progress of an interrupted run
//!   .lock                 held for the duration of an embedding run
//!   <generation>/
//!     vectors.bin         header + little-endian f32 rows
//!     ids.json            unit ids in position order
//!     units.jsonl         documents in position order
//! ```
//!
//! A generation directory is fully written before `fingerprint.json` is
//! replaced, so readers only ever see complete generations.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{EmbeddingError, Result};
use crate::fingerprint::FingerprintRecord;
use crate::index::{IndexedDocument, KnowledgeIndex, VectorIndex};

const FINGERPRINT_FILE: &str = "fingerprint.json";
const CHECKPOINT_FILE: &str = "checkpoint.json";
const LOCK_FILE: &str = ".lock";
const VECTORS_FILE: &str = "vectors.bin";
const IDS_FILE: &str = "ids.json";
const UNITS_FILE: &str = "units.jsonl";

const VECTORS_MAGIC: &[u8; 4] = b"SCTV";
const VECTORS_VERSION: u32 = 1;
const VECTORS_HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Shape recorded in a `vectors.bin` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorsHeader {
    pub dimension: usize,
    pub count: usize,
}

/// Root directory holding one subdirectory per source.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    /// Open a store rooted at `root`; nothing is created until a commit.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every file for one source.
    pub fn source_dir(&self, source_tag: &str) -> PathBuf {
        self.root.join(source_tag)
    }

    /// Pointer to the committed generation. Its presence marks a commit.
    pub fn fingerprint_path(&self, source_tag: &str) -> PathBuf {
        self.source_dir(source_tag).join(FINGERPRINT_FILE)
    }

    /// Partial progress of an interrupted embedding run.
    pub fn checkpoint_path(&self, source_tag: &str) -> PathBuf {
        self.source_dir(source_tag).join(CHECKPOINT_FILE)
    }

    /// Advisory lock held while a run writes to the source.
    pub fn lock_path(&self, source_tag: &str) -> PathBuf {
        self.source_dir(source_tag).join(LOCK_FILE)
    }

    /// Immutable directory of one committed index generation.
    pub fn generation_dir(&self, source_tag: &str, generation: &str) -> PathBuf {
        self.source_dir(source_tag).join(generation)
    }

    /// Read the committed fingerprint record, if any.
    pub async fn read_fingerprint(&self, source_tag: &str) -> Result<Option<FingerprintRecord>> {
        let path = self.fingerprint_path(source_tag);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| EmbeddingError::CorruptIndex {
                path,
                reason: e.to_string(),
            })
    }

    /// Whether the generation named by `record` is present and matches it.
    pub async fn generation_intact(&self, record: &FingerprintRecord) -> bool {
        let dir = self.generation_dir(&record.source_tag, &record.generation);
        if !tokio::fs::try_exists(dir.join(IDS_FILE)).await.unwrap_or(false)
            || !tokio::fs::try_exists(dir.join(UNITS_FILE)).await.unwrap_or(false)
        {
            return false;
        }
        match read_vectors_header(&dir.join(VECTORS_FILE)).await {
            Ok(header) => {
                header.count == record.unit_count
                    && (header.count == 0 || header.dimension == record.dimension)
            }
            Err(e) => {
                debug!("generation {} unreadable: {e}", record.generation);
                false
            }
        }
    }

    /// Persist an index as a new generation and make it current.
    pub async fn commit(
        &self,
        index: &KnowledgeIndex,
        source_fingerprint: &str,
    ) -> Result<FingerprintRecord> {
        let source_tag = index.source_tag();
        let source_dir = self.source_dir(source_tag);
        tokio::fs::create_dir_all(&source_dir).await?;

        let now = Utc::now();
        let base = format!(
            "{}-{}",
            source_fingerprint.chars().take(12).collect::<String>(),
            now.format("%Y%m%dT%H%M%S%3fZ")
        );
        let mut generation = base.clone();
        let mut suffix = 1;
        while tokio::fs::try_exists(source_dir.join(&generation)).await? {
            generation = format!("{base}-{suffix}");
            suffix += 1;
        }

        let staging = source_dir.join(format!(".tmp-{generation}"));
        if tokio::fs::try_exists(&staging).await? {
            tokio::fs::remove_dir_all(&staging).await?;
        }
        tokio::fs::create_dir_all(&staging).await?;

        let vectors = index.vectors();
        write_file(&staging.join(VECTORS_FILE), &encode_vectors(vectors)).await?;
        write_file(
            &staging.join(IDS_FILE),
            &serde_json::to_vec(vectors.ids())?,
        )
        .await?;
        let mut units = Vec::new();
        for document in index.documents() {
            serde_json::to_writer(&mut units, document)?;
            units.push(b'\n');
        }
        write_file(&staging.join(UNITS_FILE), &units).await?;

        let generation_dir = source_dir.join(&generation);
        tokio::fs::rename(&staging, &generation_dir).await?;

        let previous = match self.read_fingerprint(source_tag).await {
            Ok(previous) => previous.map(|p| p.generation),
            Err(e) => {
                warn!("replacing unreadable fingerprint for {source_tag}: {e}");
                None
            }
        };

        let record = FingerprintRecord {
            source_tag: source_tag.to_string(),
            hash: source_fingerprint.to_string(),
            updated_at: now,
            generation: generation.clone(),
            dimension: vectors.dimension(),
            unit_count: index.len(),
        };
        write_atomic(
            &self.fingerprint_path(source_tag),
            &serde_json::to_vec_pretty(&record)?,
        )
        .await?;

        info!(
            source_tag,
            generation = %generation,
            units = record.unit_count,
            "committed index generation"
        );

        if let Err(e) = self
            .prune(source_tag, &generation, previous.as_deref())
            .await
        {
            warn!("failed to prune old generations for {source_tag}: {e}");
        }

        Ok(record)
    }

    /// Load the current generation for a source.
    pub async fn load(&self, source_tag: &str) -> Result<KnowledgeIndex> {
        let record = self.read_fingerprint(source_tag).await?.ok_or_else(|| {
            EmbeddingError::IndexMissing {
                source_tag: source_tag.to_string(),
            }
        })?;
        self.load_generation(&record).await
    }

    /// Load the generation a fingerprint record points at.
    pub async fn load_generation(&self, record: &FingerprintRecord) -> Result<KnowledgeIndex> {
        let dir = self.generation_dir(&record.source_tag, &record.generation);
        let corrupt = |path: &Path, reason: String| EmbeddingError::CorruptIndex {
            path: path.to_path_buf(),
            reason,
        };

        let vectors_path = dir.join(VECTORS_FILE);
        let bytes = read_required(&vectors_path, &record.source_tag).await?;
        let (header, vectors) = decode_vectors(&bytes).map_err(|r| corrupt(&vectors_path, r))?;

        let ids_path = dir.join(IDS_FILE);
        let ids_bytes = read_required(&ids_path, &record.source_tag).await?;
        let ids: Vec<String> =
            serde_json::from_slice(&ids_bytes).map_err(|e| corrupt(&ids_path, e.to_string()))?;

        let units_path = dir.join(UNITS_FILE);
        let units_bytes = read_required(&units_path, &record.source_tag).await?;
        let mut documents = Vec::with_capacity(header.count);
        for (line_no, line) in String::from_utf8_lossy(&units_bytes).lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let document: IndexedDocument = serde_json::from_str(line)
                .map_err(|e| corrupt(&units_path, format!("line {}: {e}", line_no + 1)))?;
            documents.push(document);
        }

        let vector_index = VectorIndex::from_parts(header.dimension, ids, vectors)
            .map_err(|e| corrupt(&dir, e.to_string()))?;
        let index = KnowledgeIndex::from_parts(record.source_tag.clone(), vector_index, documents)
            .map_err(|e| corrupt(&dir, e.to_string()))?;

        debug!(
            "Loaded {} entries for {} from generation {}",
            index.len(),
            record.source_tag,
            record.generation
        );
        Ok(index)
    }

    /// Remove generations other than `current` and `previous`, plus leftovers
    /// from aborted commits.
    async fn prune(&self, source_tag: &str, current: &str, previous: Option<&str>) -> Result<()> {
        let mut entries = tokio::fs::read_dir(self.source_dir(source_tag)).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name == current || Some(name.as_str()) == previous {
                continue;
            }
            debug!("pruning generation {name} of {source_tag}");
            tokio::fs::remove_dir_all(entry.path()).await?;
        }
        Ok(())
    }
}

async fn read_required(path: &Path, source_tag: &str) -> Result<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(EmbeddingError::CorruptIndex {
            path: path.to_path_buf(),
            reason: format!("missing file for source {source_tag}"),
        }),
        Err(e) => Err(e.into()),
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

/// Write a file by writing a sibling temp file and renaming it into place.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));
    write_file(&temp_path, bytes).await?;
    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}

fn encode_vectors(index: &VectorIndex) -> Vec<u8> {
    let mut out = Vec::with_capacity(VECTORS_HEADER_LEN + index.len() * index.dimension() * 4);
    out.extend_from_slice(VECTORS_MAGIC);
    out.extend_from_slice(&VECTORS_VERSION.to_le_bytes());
    out.extend_from_slice(&(index.dimension() as u32).to_le_bytes());
    out.extend_from_slice(&(index.len() as u64).to_le_bytes());
    for vector in index.vectors() {
        for value in vector {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out
}

fn decode_header(bytes: &[u8]) -> std::result::Result<VectorsHeader, String> {
    if bytes.len() < VECTORS_HEADER_LEN {
        return Err(format!("file too short ({} bytes)", bytes.len()));
    }
    if &bytes[0..4] != VECTORS_MAGIC {
        return Err("bad magic".to_string());
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != VECTORS_VERSION {
        return Err(format!("unsupported version {version}"));
    }
    let dimension = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let mut count = [0u8; 8];
    count.copy_from_slice(&bytes[12..20]);
    Ok(VectorsHeader {
        dimension,
        count: u64::from_le_bytes(count) as usize,
    })
}

fn decode_vectors(bytes: &[u8]) -> std::result::Result<(VectorsHeader, Vec<Vec<f32>>), String> {
    let header = decode_header(bytes)?;
    let expected = header
        .count
        .checked_mul(header.dimension)
        .and_then(|n| n.checked_mul(4))
        .and_then(|n| n.checked_add(VECTORS_HEADER_LEN))
        .ok_or_else(|| "header overflows".to_string())?;
    if bytes.len() != expected {
        return Err(format!(
            "expected {expected} bytes for {} x {}, found {}",
            header.count,
            header.dimension,
            bytes.len()
        ));
    }

    let body = &bytes[VECTORS_HEADER_LEN..];
    let vectors = if header.dimension == 0 {
        vec![Vec::new(); header.count]
    } else {
        body.chunks_exact(header.dimension * 4)
            .map(|row| {
                row.chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect()
            })
            .collect()
    };
    Ok((header, vectors))
}

async fn read_vectors_header(path: &Path) -> Result<VectorsHeader> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path).await?;
    let mut header = [0u8; VECTORS_HEADER_LEN];
    file.read_exact(&mut header).await?;
    decode_header(&header).map_err(|reason| EmbeddingError::CorruptIndex {
        path: path.to_path_buf(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::EmbeddingRecord;
    use pretty_assertions::assert_eq;
    use sct_corpus::KnowledgeUnit;
    use tempfile::TempDir;
    use tokio_test::assert_err;

    fn sample_index() -> KnowledgeIndex {
        let units = vec![
            KnowledgeUnit::new("u1", "bin yield", "ontology").with_metadata("type", "class"),
            KnowledgeUnit::new("u2", "die grade", "ontology"),
        ];
        let records = vec![
            EmbeddingRecord::new("u1", vec![3.0, 4.0]),
            EmbeddingRecord::degraded("u2", 2),
        ];
        KnowledgeIndex::build("ontology", &units, records).unwrap()
    }

    #[tokio::test]
    async fn test_commit_then_load() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());
        let index = sample_index();

        let record = store.commit(&index, "abcdef0123456789").await.unwrap();
        assert_eq!(record.unit_count, 2);
        assert_eq!(record.dimension, 2);
        assert!(record.generation.starts_with("abcdef012345-"));
        assert!(store.generation_intact(&record).await);

        let loaded = store.load("ontology").await.unwrap();
        assert_eq!(loaded, index);
        assert!(loaded.documents().iter().all(|d| d.source_tag == "ontology"));

        let units = std::fs::read_to_string(
            store
                .generation_dir("ontology", &record.generation)
                .join(UNITS_FILE),
        )
        .unwrap();
        let first: serde_json::Value =
            serde_json::from_str(units.lines().next().unwrap()).unwrap();
        assert_eq!(first["source_tag"], "ontology");
        assert_eq!(first["type"], "class");
        assert_eq!(
            loaded.documents()[0].metadata.get("type"),
            Some(&serde_json::Value::from("class"))
        );
    }

    #[tokio::test]
    async fn test_load_without_commit_is_missing() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());
        assert!(matches!(
            store.load("papers").await,
            Err(EmbeddingError::IndexMissing { .. })
        ));
    }

    #[tokio::test]
    async fn test_truncated_vectors_detected() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());
        let record = store.commit(&sample_index(), "feed").await.unwrap();

        let vectors = store
            .generation_dir("ontology", &record.generation)
            .join(VECTORS_FILE);
        let bytes = std::fs::read(&vectors).unwrap();
        std::fs::write(&vectors, &bytes[..bytes.len() - 4]).unwrap();

        assert!(matches!(
            store.load("ontology").await,
            Err(EmbeddingError::CorruptIndex { .. })
        ));
    }

    #[tokio::test]
    async fn test_old_generations_pruned() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());
        let index = sample_index();

        let first = store.commit(&index, "aaaa").await.unwrap();
        let second = store.commit(&index, "bbbb").await.unwrap();
        let third = store.commit(&index, "cccc").await.unwrap();

        let source_dir = store.source_dir("ontology");
        assert!(!source_dir.join(&first.generation).exists());
        assert!(source_dir.join(&second.generation).exists());
        assert!(source_dir.join(&third.generation).exists());
        assert_eq!(
            store.read_fingerprint("ontology").await.unwrap().unwrap(),
            third
        );
    }

    #[tokio::test]
    async fn test_missing_generation_not_intact() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());
        let record = store.commit(&sample_index(), "feed").await.unwrap();

        std::fs::remove_dir_all(store.generation_dir("ontology", &record.generation)).unwrap();
        assert!(!store.generation_intact(&record).await);
    }

    #[test]
    fn test_vectors_codec_rejects_bad_magic() {
        let mut bytes = encode_vectors(sample_index().vectors());
        bytes[0] = b'X';
        assert_err!(decode_vectors(&bytes));
    }
}
