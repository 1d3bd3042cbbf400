use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Weight vector for the composite fit score. Each component's weight is a
/// fraction of the final 0-100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub keyword_match: f64,
    pub semantic_coverage: f64,
    pub semantic_strength: f64,
    pub seniority_alignment: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            keyword_match: 0.35,
            semantic_coverage: 0.40,
            semantic_strength: 0.10,
            seniority_alignment: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Minimum cosine similarity for a requirement to count as covered.
    pub similarity_threshold: f64,
    /// Resume bullets retrieved per requirement.
    pub top_k: usize,
    pub weights: Weights,
    /// Post-score filter threshold, 0-100.
    pub min_match_score: f64,
    /// Streaming autosave threshold, 0-100.
    pub auto_save_threshold: f64,
    /// Opaque embedding model identifier; part of the engine version hash.
    /// `local-hash-v1` selects the deterministic offline backend.
    pub embedding_model_id: String,
    /// LLM provider for cover letters and compensation parsing
    /// ("anthropic" or "openai"); absent disables LLM features.
    pub llm_provider: Option<String>,
    pub llm_model: String,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.30,
            top_k: 8,
            weights: Weights::default(),
            min_match_score: 0.0,
            auto_save_threshold: 50.0,
            embedding_model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            llm_provider: None,
            llm_model: "claude-sonnet-4-5-20250929".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Resume source: a PDF (extracted via pdftotext) or a plain text file,
    /// one bullet per line.
    pub resume_path: PathBuf,
    /// Directory for derived artifacts: resume index, exports, cover letters.
    pub data_dir: PathBuf,
    /// Database file; defaults to the platform data directory.
    pub db_path: Option<PathBuf>,
    pub portal_base_url: String,
    /// Portal folder that streaming autosave targets.
    pub portal_folder: String,
    /// Commit scraped jobs every N inserts.
    pub scrape_checkpoint_every: usize,
    /// Case-insensitive location substrings; empty disables the filter.
    pub preferred_locations: Vec<String>,
    /// Require at least one of these in title or summary; empty disables.
    pub keywords_to_match: Vec<String>,
    /// Companies to drop, case-insensitive exact match.
    pub companies_to_avoid: Vec<String>,
    /// External technology lexicon (JSON list of term entries).
    pub tech_lexicon_path: Option<PathBuf>,
    /// External noise skip-phrase list (JSON list of strings).
    pub noise_skip_phrases_path: Option<PathBuf>,
    pub cover_letter_template: Option<PathBuf>,
    pub matcher: MatcherConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            resume_path: PathBuf::from("input/resume.pdf"),
            data_dir: PathBuf::from("data"),
            db_path: None,
            portal_base_url: "https://waterlooworks.uwaterloo.ca".to_string(),
            portal_folder: "shortlist".to_string(),
            scrape_checkpoint_every: 5,
            preferred_locations: Vec::new(),
            keywords_to_match: Vec::new(),
            companies_to_avoid: Vec::new(),
            tech_lexicon_path: None,
            noise_skip_phrases_path: None,
            cover_letter_template: None,
            matcher: MatcherConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration. An explicit path must exist; without one,
    /// `config.json` in the working directory is used when present,
    /// otherwise defaults apply. Validation failures are fatal before any
    /// side effect.
    pub fn load(path: Option<&Path>) -> Result<AppConfig> {
        let config = match path {
            Some(p) => Self::parse_file(p)?,
            None => {
                let default_path = PathBuf::from("config.json");
                if default_path.exists() {
                    Self::parse_file(&default_path)?
                } else {
                    AppConfig::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<AppConfig> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid config {}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        let w = &self.matcher.weights;
        for (name, value) in [
            ("weights.keyword_match", w.keyword_match),
            ("weights.semantic_coverage", w.semantic_coverage),
            ("weights.semantic_strength", w.semantic_strength),
            ("weights.seniority_alignment", w.seniority_alignment),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{name} must be in [0, 1], got {value}")));
            }
        }
        if !(-1.0..=1.0).contains(&self.matcher.similarity_threshold) {
            return Err(Error::Config(format!(
                "similarity_threshold must be a cosine in [-1, 1], got {}",
                self.matcher.similarity_threshold
            )));
        }
        if self.matcher.top_k == 0 {
            return Err(Error::Config("top_k must be at least 1".to_string()));
        }
        if self.scrape_checkpoint_every == 0 {
            return Err(Error::Config(
                "scrape_checkpoint_every must be at least 1".to_string(),
            ));
        }
        if let Some(provider) = &self.matcher.llm_provider {
            if provider != "anthropic" && provider != "openai" {
                return Err(Error::Config(format!(
                    "unknown llm_provider '{provider}' (expected 'anthropic' or 'openai')"
                )));
            }
        }
        Ok(())
    }

    /// Database location: explicit path, or the platform data directory.
    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = &self.db_path {
            return path.clone();
        }
        if let Some(dirs) = directories::ProjectDirs::from("", "", "coopscout") {
            dirs.data_dir().join("coopscout.db")
        } else {
            self.data_dir.join("coopscout.db")
        }
    }

    pub fn resume_index_dir(&self) -> PathBuf {
        self.data_dir.join("resume_index")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.matcher.similarity_threshold, 0.30);
        assert_eq!(cfg.matcher.top_k, 8);
        assert_eq!(cfg.matcher.weights.keyword_match, 0.35);
        assert_eq!(cfg.matcher.weights.semantic_coverage, 0.40);
        assert_eq!(cfg.matcher.weights.semantic_strength, 0.10);
        assert_eq!(cfg.matcher.weights.seniority_alignment, 0.15);
        assert_eq!(cfg.scrape_checkpoint_every, 5);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{"matcher": {"min_match_score": 40.0}, "preferred_locations": ["Toronto"]}"#,
        )
        .unwrap();
        assert_eq!(cfg.matcher.min_match_score, 40.0);
        assert_eq!(cfg.matcher.top_k, 8);
        assert_eq!(cfg.preferred_locations, vec!["Toronto".to_string()]);
    }

    #[test]
    fn test_validate_rejects_bad_weight() {
        let mut cfg = AppConfig::default();
        cfg.matcher.weights.keyword_match = 1.5;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_top_k() {
        let mut cfg = AppConfig::default();
        cfg.matcher.top_k = 0;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_provider() {
        let mut cfg = AppConfig::default();
        cfg.matcher.llm_provider = Some("gemini".to_string());
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_explicit_config_is_fatal() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/config.json"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
