//! Append-only vector index.
//!
//! Entries are (vector, text) pairs addressed by insertion order. The
//! dimensionality is fixed when the index is created and every later vector
//! must match it. Search is a raw inner product: callers normalize vectors
//! first when they want cosine similarity.
//!
//! # Backends
//!
//! [`IndexBackend::Exact`] scores rows one after another;
//! [`IndexBackend::Parallel`] splits the rows across the rayon pool. Both use
//! the same per-row dot product and the same ranking, so results are
//! identical; the backend only changes how the work is scheduled. It is
//! chosen once when the index is created and persisted with it.
//!
//! # On-disk layout
//!
//! ```text
//! <base>.vec         "VPIX" | u32 version | u8 backend | u32 dim | u64 count | f32 LE rows
//! <base>.texts.json  JSON array of strings
//! ```
//!
//! Both artifacts are written to a temporary file and renamed into place,
//! texts first. The loader trusts the row count in the vector header and
//! ignores extra trailing texts, so a crash between the two renames leaves
//! the previous index readable.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::rag::types::ScoredText;
use crate::utilities::errors::IndexError;
use crate::utilities::paths::with_suffix;

const MAGIC: &[u8; 4] = b"VPIX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 1 + 4 + 8;

/// How search work is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    /// Sequential brute-force scoring.
    Exact,
    /// Data-parallel brute-force scoring on the rayon pool.
    Parallel,
}

impl IndexBackend {
    /// Pick a backend for a new index.
    ///
    /// `Parallel` needs both the preference and more than one worker thread.
    pub fn resolve(prefer_accelerated: bool) -> Self {
        if prefer_accelerated && rayon::current_num_threads() > 1 {
            IndexBackend::Parallel
        } else {
            IndexBackend::Exact
        }
    }

    fn tag(self) -> u8 {
        match self {
            IndexBackend::Exact => 0,
            IndexBackend::Parallel => 1,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(IndexBackend::Exact),
            1 => Some(IndexBackend::Parallel),
            _ => None,
        }
    }
}

/// Path of the vector artifact for `base`.
pub fn vectors_path(base: &Path) -> PathBuf {
    with_suffix(base, ".vec")
}

/// Path of the text artifact for `base`.
pub fn texts_path(base: &Path) -> PathBuf {
    with_suffix(base, ".texts.json")
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// In-memory vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dim: usize,
    backend: IndexBackend,
    /// Row-major, `texts.len() * dim` values.
    vectors: Vec<f32>,
    texts: Vec<String>,
}

impl VectorIndex {
    pub fn new(dim: usize, backend: IndexBackend) -> Self {
        Self {
            dim,
            backend,
            vectors: Vec::new(),
            texts: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn backend(&self) -> IndexBackend {
        self.backend
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    /// Append entries. Nothing is appended when validation fails.
    pub fn add(&mut self, vectors: &[Vec<f32>], texts: &[String]) -> Result<(), IndexError> {
        if vectors.len() != texts.len() {
            return Err(IndexError::LengthMismatch {
                vectors: vectors.len(),
                texts: texts.len(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                found: bad.len(),
            });
        }
        self.vectors.reserve(vectors.len() * self.dim);
        for v in vectors {
            self.vectors.extend_from_slice(v);
        }
        self.texts.extend_from_slice(texts);
        Ok(())
    }

    /// Up to `k` entries per query by descending score; ties go to the
    /// earlier entry. An empty index yields an empty list per query.
    pub fn search(&self, queries: &[Vec<f32>], k: usize) -> Result<Vec<Vec<ScoredText>>, IndexError> {
        if self.is_empty() || k == 0 || self.dim == 0 {
            return Ok(vec![Vec::new(); queries.len()]);
        }
        if let Some(bad) = queries.iter().find(|q| q.len() != self.dim) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                found: bad.len(),
            });
        }
        Ok(queries.iter().map(|q| self.top_k(q, k)).collect())
    }

    fn scores(&self, query: &[f32]) -> Vec<f32> {
        match self.backend {
            IndexBackend::Exact => self
                .vectors
                .chunks_exact(self.dim)
                .map(|row| dot(row, query))
                .collect(),
            IndexBackend::Parallel => self
                .vectors
                .par_chunks_exact(self.dim)
                .map(|row| dot(row, query))
                .collect(),
        }
    }

    fn top_k(&self, query: &[f32], k: usize) -> Vec<ScoredText> {
        let scores = self.scores(query);
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
        order
            .into_iter()
            .take(k)
            .map(|i| ScoredText::new(self.texts[i].clone(), scores[i]))
            .collect()
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Persist both artifacts under `base`.
    pub fn save(&self, base: &Path) -> Result<(), IndexError> {
        if let Some(parent) = base.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&texts_path(base), &serde_json::to_vec(&self.texts)?)?;

        let mut buf = Vec::with_capacity(HEADER_LEN + self.vectors.len() * 4);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.push(self.backend.tag());
        buf.extend_from_slice(&(self.dim as u32).to_le_bytes());
        buf.extend_from_slice(&(self.texts.len() as u64).to_le_bytes());
        for x in &self.vectors {
            buf.extend_from_slice(&x.to_le_bytes());
        }
        write_atomic(&vectors_path(base), &buf)?;
        Ok(())
    }

    /// Load the index persisted under `base`; `Ok(None)` when none exists yet.
    pub fn load(base: &Path) -> Result<Option<Self>, IndexError> {
        let vec_path = vectors_path(base);
        let raw = match fs::read(&vec_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let corrupt = |message: String| IndexError::Corrupt {
            path: vec_path.clone(),
            message,
        };

        if raw.len() < HEADER_LEN || &raw[..4] != MAGIC {
            return Err(corrupt("bad header".to_string()));
        }
        let version = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        if version != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {}", version)));
        }
        let backend =
            IndexBackend::from_tag(raw[8]).ok_or_else(|| corrupt(format!("unknown backend tag {}", raw[8])))?;
        let dim = u32::from_le_bytes([raw[9], raw[10], raw[11], raw[12]]) as usize;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&raw[13..21]);
        let count = u64::from_le_bytes(count_bytes) as usize;

        let body = &raw[HEADER_LEN..];
        if body.len() != count * dim * 4 {
            return Err(corrupt(format!(
                "expected {} rows of dim {}, found {} bytes",
                count,
                dim,
                body.len()
            )));
        }
        let vectors: Vec<f32> = body
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let mut texts: Vec<String> = serde_json::from_slice(&fs::read(texts_path(base))?)?;
        if texts.len() < count {
            return Err(IndexError::Corrupt {
                path: texts_path(base),
                message: format!("{} texts for {} vectors", texts.len(), count),
            });
        }
        texts.truncate(count);

        Ok(Some(Self {
            dim,
            backend,
            vectors,
            texts,
        }))
    }

    /// Delete both artifacts under `base`; missing files are fine.
    pub fn remove_artifacts(base: &Path) -> Result<bool, IndexError> {
        let mut removed = false;
        for path in [vectors_path(base), texts_path(base)] {
            match fs::remove_file(&path) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}

/// Write `bytes` to a sibling temp file, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = with_suffix(path, ".tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(backend: IndexBackend) -> VectorIndex {
        let mut idx = VectorIndex::new(2, backend);
        idx.add(
            &[vec![1.0, 0.0], vec![0.0, 1.0], vec![0.6, 0.8]],
            &["east".to_string(), "north".to_string(), "between".to_string()],
        )
        .unwrap();
        idx
    }

    #[test]
    fn test_add_rejects_dimension_mismatch() {
        let mut idx = VectorIndex::new(3, IndexBackend::Exact);
        let err = idx.add(&[vec![1.0, 2.0]], &["a".to_string()]).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 3, found: 2 }));
        assert!(idx.is_empty());
    }

    #[test]
    fn test_add_rejects_length_mismatch() {
        let mut idx = VectorIndex::new(1, IndexBackend::Exact);
        let err = idx
            .add(&[vec![1.0]], &["a".to_string(), "b".to_string()])
            .unwrap_err();
        assert!(matches!(err, IndexError::LengthMismatch { vectors: 1, texts: 2 }));
    }

    #[test]
    fn test_search_orders_by_score() {
        let idx = sample(IndexBackend::Exact);
        let hits = idx.search(&[vec![1.0, 0.0]], 2).unwrap();
        assert_eq!(hits[0][0].text, "east");
        assert_eq!(hits[0][1].text, "between");
        assert!((hits[0][1].score - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        let mut idx = VectorIndex::new(1, IndexBackend::Exact);
        idx.add(
            &[vec![1.0], vec![1.0], vec![1.0]],
            &["first".into(), "second".into(), "third".into()],
        )
        .unwrap();
        let hits = idx.search(&[vec![1.0]], 2).unwrap();
        let texts: Vec<&str> = hits[0].iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_empty_index_returns_empty_per_query() {
        let idx = VectorIndex::new(2, IndexBackend::Exact);
        let hits = idx.search(&[vec![1.0, 0.0], vec![0.0, 1.0]], 3).unwrap();
        assert_eq!(hits, vec![Vec::new(), Vec::new()]);
    }

    #[test]
    fn test_backends_agree() {
        let exact = sample(IndexBackend::Exact);
        let parallel = sample(IndexBackend::Parallel);
        let queries = vec![vec![0.3, 0.9], vec![-1.0, 0.2]];
        assert_eq!(
            exact.search(&queries, 3).unwrap(),
            parallel.search(&queries, 3).unwrap()
        );
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("indexes").join("p.idx");
        let idx = sample(IndexBackend::Parallel);
        idx.save(&base).unwrap();

        let loaded = VectorIndex::load(&base).unwrap().unwrap();
        assert_eq!(loaded, idx);
        let queries = vec![vec![0.5, 0.5]];
        let before = idx.search(&queries, 3).unwrap();
        let after = loaded.search(&queries, 3).unwrap();
        for (b, a) in before[0].iter().zip(&after[0]) {
            assert_eq!(b.text, a.text);
            assert!((b.score - a.score).abs() < 1e-5);
        }
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(VectorIndex::load(&dir.path().join("nope.idx")).unwrap().is_none());
    }

    #[test]
    fn test_load_ignores_texts_written_ahead_of_vectors() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("p.idx");
        let idx = sample(IndexBackend::Exact);
        idx.save(&base).unwrap();

        // Simulate a crash after the texts rename but before the vectors rename.
        let mut longer = idx.texts().to_vec();
        longer.push("pending".to_string());
        fs::write(texts_path(&base), serde_json::to_vec(&longer).unwrap()).unwrap();

        let loaded = VectorIndex::load(&base).unwrap().unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.texts(), idx.texts());
    }

    #[test]
    fn test_load_rejects_truncated_vectors() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("p.idx");
        sample(IndexBackend::Exact).save(&base).unwrap();
        let raw = fs::read(vectors_path(&base)).unwrap();
        fs::write(vectors_path(&base), &raw[..raw.len() - 4]).unwrap();
        assert!(matches!(
            VectorIndex::load(&base),
            Err(IndexError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_remove_artifacts() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("p.idx");
        sample(IndexBackend::Exact).save(&base).unwrap();
        assert!(VectorIndex::remove_artifacts(&base).unwrap());
        assert!(!VectorIndex::remove_artifacts(&base).unwrap());
        assert!(VectorIndex::load(&base).unwrap().is_none());
    }
}
