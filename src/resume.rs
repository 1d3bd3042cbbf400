use std::fs;
use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::embedding::{decode_vectors, dot, encode_vectors, EmbeddingProvider, EMBEDDING_DIM};
use crate::error::{Error, Result};

/// Bump when the bullet segmentation rules change; part of the index
/// staleness key alongside the source hash and model id.
pub const BULLET_SPLIT_VERSION: &str = "v2";

const MANIFEST_FILE: &str = "manifest.json";
const VECTORS_FILE: &str = "vectors.bin";

/// Glyphs stripped from the front of a line before the length rule applies.
const BULLET_GLYPHS: &[char] = &['\u{2022}', '\u{25cf}', '\u{25e6}', '\u{25aa}', '-', '*'];

const MIN_BULLET_CHARS: usize = 15;

#[derive(Debug, Serialize, Deserialize)]
struct IndexManifest {
    source_hash: String,
    model_id: String,
    bullet_split_version: String,
    dimension: usize,
    bullets: Vec<String>,
}

/// Read-only vector index over resume bullets. Built once per run, shared
/// freely by readers afterwards.
#[derive(Debug)]
pub struct ResumeIndex {
    bullets: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

impl ResumeIndex {
    /// Load the persisted index if its manifest still matches
    /// `hash(source) || model_id || bullet_split_version`; rebuild and
    /// persist otherwise. A missing or corrupt artifact is a rebuild, not an
    /// error; a rebuild failure is fatal to the run.
    pub fn open_or_build(
        source: &Path,
        provider: &dyn EmbeddingProvider,
        index_dir: &Path,
    ) -> Result<Self> {
        let raw = load_resume_text(source)?;
        let source_hash = {
            let mut hasher = Sha256::new();
            hasher.update(raw.as_bytes());
            format!("{:x}", hasher.finalize())
        };

        if let Some(index) = Self::try_load(index_dir, &source_hash, provider.model_id()) {
            debug!(bullets = index.len(), "loaded cached resume index");
            return Ok(index);
        }

        info!(source = %source.display(), "building resume index");
        let bullets = split_bullets(&raw);
        let vectors = if bullets.is_empty() {
            Vec::new()
        } else {
            provider.encode(&bullets)?
        };
        if vectors.len() != bullets.len() {
            return Err(Error::Index(format!(
                "embedding count mismatch: {} bullets, {} vectors",
                bullets.len(),
                vectors.len()
            )));
        }

        let index = Self { bullets, vectors };
        index.save(index_dir, &source_hash, provider.model_id())?;
        info!(bullets = index.len(), "resume index built");
        Ok(index)
    }

    /// Build in memory only; used by analysis paths that already hold text.
    pub fn build(bullets: Vec<String>, provider: &dyn EmbeddingProvider) -> Result<Self> {
        let vectors = if bullets.is_empty() {
            Vec::new()
        } else {
            provider.encode(&bullets)?
        };
        Ok(Self { bullets, vectors })
    }

    fn try_load(dir: &Path, source_hash: &str, model_id: &str) -> Option<Self> {
        let manifest_raw = fs::read_to_string(dir.join(MANIFEST_FILE)).ok()?;
        let manifest: IndexManifest = serde_json::from_str(&manifest_raw).ok()?;
        if manifest.source_hash != source_hash
            || manifest.model_id != model_id
            || manifest.bullet_split_version != BULLET_SPLIT_VERSION
            || manifest.dimension != EMBEDDING_DIM
        {
            return None;
        }
        let blob = fs::read(dir.join(VECTORS_FILE)).ok()?;
        let vectors = decode_vectors(&blob, EMBEDDING_DIM)?;
        if vectors.len() != manifest.bullets.len() {
            return None;
        }
        Some(Self {
            bullets: manifest.bullets,
            vectors,
        })
    }

    fn save(&self, dir: &Path, source_hash: &str, model_id: &str) -> Result<()> {
        fs::create_dir_all(dir)?;
        let manifest = IndexManifest {
            source_hash: source_hash.to_string(),
            model_id: model_id.to_string(),
            bullet_split_version: BULLET_SPLIT_VERSION.to_string(),
            dimension: EMBEDDING_DIM,
            bullets: self.bullets.clone(),
        };
        fs::write(
            dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;
        fs::write(dir.join(VECTORS_FILE), encode_vectors(&self.vectors))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bullets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bullets.is_empty()
    }

    pub fn bullets(&self) -> &[String] {
        &self.bullets
    }

    pub fn bullet(&self, index: usize) -> Option<&str> {
        self.bullets.get(index).map(String::as_str)
    }

    /// Exact inner-product top-k. Ties break toward the lower bullet index.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(index, vector)| (index, dot(query, vector)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }
}

/// Resume text from a PDF (via pdftotext) or a plain text file.
pub fn load_resume_text(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(Error::Index(format!(
            "resume not found at {}",
            path.display()
        )));
    }
    let is_pdf = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    if is_pdf {
        extract_pdf_text(path)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn extract_pdf_text(path: &Path) -> Result<String> {
    let output = Command::new("pdftotext")
        .arg(path)
        .arg("-")
        .output()
        .map_err(|e| Error::Index(format!("failed to run pdftotext: {e}")))?;
    if !output.status.success() {
        return Err(Error::Index(format!(
            "pdftotext failed for {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Deterministic bullet segmentation: one unit per hard line break, leading
/// bullet glyphs stripped, short and empty lines dropped, order preserved.
pub fn split_bullets(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let mut line = line.trim();
            while let Some(stripped) = line.strip_prefix(BULLET_GLYPHS) {
                line = stripped.trim_start();
            }
            if line.chars().count() < MIN_BULLET_CHARS {
                None
            } else {
                Some(line.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("resume-index-{tag}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_split_bullets() {
        let text = "\
• Built a Python REST API with PostgreSQL.
- Led migration to Kubernetes across 3 teams.
ok
   \n\
Deployed monitoring dashboards with Grafana.";
        let bullets = split_bullets(text);
        assert_eq!(
            bullets,
            vec![
                "Built a Python REST API with PostgreSQL.".to_string(),
                "Led migration to Kubernetes across 3 teams.".to_string(),
                "Deployed monitoring dashboards with Grafana.".to_string(),
            ]
        );
    }

    #[test]
    fn test_search_ranking_and_ties() {
        let index = ResumeIndex {
            bullets: vec!["a".into(), "b".into(), "c".into()],
            vectors: vec![
                vec![0.0, 1.0],
                vec![1.0, 0.0],
                vec![1.0, 0.0], // same direction as "b": tie broken by index
            ],
        };
        let hits = index.search(&[1.0, 0.0], 3);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, 1);
        assert_eq!(hits[1].0, 2);
        assert_eq!(hits[2].0, 0);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_truncates_to_k() {
        let index = ResumeIndex {
            bullets: vec!["a".into(), "b".into()],
            vectors: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
        };
        assert_eq!(index.search(&[1.0, 0.0], 1).len(), 1);
    }

    #[test]
    fn test_empty_index_search() {
        let index = ResumeIndex {
            bullets: vec![],
            vectors: vec![],
        };
        assert!(index.search(&[1.0, 0.0], 8).is_empty());
    }

    #[test]
    fn test_open_or_build_roundtrip_and_cache() {
        let dir = temp_dir("roundtrip");
        let source = dir.join("resume.txt");
        fs::write(&source, "Built a Python REST API with PostgreSQL.\nLed migration to Kubernetes.\n").unwrap();

        let provider = HashEmbedder;
        let index_dir = dir.join("index");
        let built = ResumeIndex::open_or_build(&source, &provider, &index_dir).unwrap();
        assert_eq!(built.len(), 2);
        assert!(index_dir.join(MANIFEST_FILE).exists());
        assert!(index_dir.join(VECTORS_FILE).exists());

        // Second open loads the cached artifact and agrees bit-for-bit.
        let loaded = ResumeIndex::open_or_build(&source, &provider, &index_dir).unwrap();
        assert_eq!(built.bullets, loaded.bullets);
        assert_eq!(built.vectors, loaded.vectors);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_source_change_triggers_rebuild() {
        let dir = temp_dir("rebuild");
        let source = dir.join("resume.txt");
        fs::write(&source, "Built a Python REST API with PostgreSQL.\n").unwrap();

        let provider = HashEmbedder;
        let index_dir = dir.join("index");
        let first = ResumeIndex::open_or_build(&source, &provider, &index_dir).unwrap();
        assert_eq!(first.len(), 1);

        fs::write(&source, "Built a Python REST API with PostgreSQL.\nShipped Terraform modules for AWS.\n").unwrap();
        let second = ResumeIndex::open_or_build(&source, &provider, &index_dir).unwrap();
        assert_eq!(second.len(), 2);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_corrupt_vectors_rebuild() {
        let dir = temp_dir("corrupt");
        let source = dir.join("resume.txt");
        fs::write(&source, "Built a Python REST API with PostgreSQL.\n").unwrap();

        let provider = HashEmbedder;
        let index_dir = dir.join("index");
        ResumeIndex::open_or_build(&source, &provider, &index_dir).unwrap();
        fs::write(index_dir.join(VECTORS_FILE), b"garbage").unwrap();

        let rebuilt = ResumeIndex::open_or_build(&source, &provider, &index_dir).unwrap();
        assert_eq!(rebuilt.len(), 1);
        // Artifact was re-persisted and is loadable again.
        let blob = fs::read(index_dir.join(VECTORS_FILE)).unwrap();
        assert_eq!(blob.len(), EMBEDDING_DIM * 4);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_resume_is_fatal() {
        let provider = HashEmbedder;
        let err = ResumeIndex::open_or_build(
            Path::new("/nonexistent/resume.pdf"),
            &provider,
            Path::new("/tmp/never-used"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Index(_)));
    }
}
