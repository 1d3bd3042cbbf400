use std::collections::BTreeSet;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::config::MatcherConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::extractor::{extract_requirements, SkipPhrases};
use crate::lexicon::TechLexicon;
use crate::models::{Evidence, Job, MatchResult};
use crate::resume::ResumeIndex;

/// Bumped whenever the scoring algorithm itself changes; folded into the
/// engine version so old cached results go stale.
pub const ALGORITHM_REVISION: u32 = 3;

/// Hybrid scorer: keyword overlap, semantic coverage, semantic strength,
/// and seniority alignment, combined by the configured weights into a
/// 0-100 fit score. Deterministic for identical inputs and version.
pub struct Matcher {
    provider: Box<dyn EmbeddingProvider>,
    index: ResumeIndex,
    lexicon: TechLexicon,
    skip: SkipPhrases,
    resume_tech: BTreeSet<String>,
    config: MatcherConfig,
    version: String,
}

impl Matcher {
    pub fn new(
        provider: Box<dyn EmbeddingProvider>,
        index: ResumeIndex,
        lexicon: TechLexicon,
        skip: SkipPhrases,
        config: MatcherConfig,
    ) -> Self {
        // The resume tech set is a function of resume text alone, computed
        // once per run.
        let resume_tech = lexicon.extract(&index.bullets().join("\n"));
        let version = engine_version(&config, lexicon.digest(), skip.digest(), provider.model_id());
        Self {
            provider,
            index,
            lexicon,
            skip,
            resume_tech,
            config,
            version,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn resume_tech(&self) -> &BTreeSet<String> {
        &self.resume_tech
    }

    pub fn index(&self) -> &ResumeIndex {
        &self.index
    }

    pub fn analyze(&self, job: &Job) -> Result<MatchResult> {
        let requirements = extract_requirements(job, &self.lexicon, &self.skip);

        let job_tech = self.lexicon.extract(&job.sections_text());
        let matched: Vec<String> = job_tech.intersection(&self.resume_tech).cloned().collect();
        let missing: Vec<String> = job_tech.difference(&self.resume_tech).cloned().collect();
        let keyword_match = if job_tech.is_empty() {
            0.0
        } else {
            matched.len() as f64 / job_tech.len() as f64
        };

        let mut evidence = Vec::with_capacity(requirements.len());
        if !requirements.is_empty() {
            let query_vectors = self.provider.encode(&requirements)?;
            for (requirement, vector) in requirements.iter().zip(query_vectors.iter()) {
                let top = self.index.search(vector, self.config.top_k);
                let (bullet_index, similarity) = match top.first() {
                    Some(&(index, similarity)) => (Some(index), f64::from(similarity)),
                    None => (None, 0.0),
                };
                if !similarity.is_finite() {
                    return Err(Error::Matcher(format!(
                        "non-finite similarity for requirement '{requirement}'"
                    )));
                }
                evidence.push(Evidence {
                    requirement: requirement.clone(),
                    bullet_index,
                    similarity,
                    covered: similarity >= self.config.similarity_threshold,
                });
            }
        }

        let covered = evidence.iter().filter(|e| e.covered).count();
        let semantic_coverage = covered as f64 / evidence.len().max(1) as f64;
        let semantic_strength = if covered == 0 {
            0.0
        } else {
            let sum: f64 = evidence
                .iter()
                .filter(|e| e.covered)
                .map(|e| e.similarity.max(0.0))
                .sum();
            (sum / covered as f64).clamp(0.0, 1.0)
        };

        let seniority_alignment = seniority_alignment(&job.title, &job.summary);

        let w = &self.config.weights;
        let composite = 100.0
            * (w.keyword_match * keyword_match
                + w.semantic_coverage * semantic_coverage
                + w.semantic_strength * semantic_strength
                + w.seniority_alignment * seniority_alignment);
        let fit_score = (composite * 10.0).round() / 10.0;

        Ok(MatchResult {
            job_id: job.job_id.clone(),
            fit_score,
            keyword_match,
            semantic_coverage,
            semantic_strength,
            seniority_alignment,
            matched_technologies: matched,
            missing_technologies: missing,
            evidence,
            analysis_version: self.version.clone(),
            analyzed_at: Utc::now().to_rfc3339(),
        })
    }
}

/// Level keyword scan over title and summary; first matching tier wins.
pub fn seniority_alignment(title: &str, summary: &str) -> f64 {
    let text = format!("{title} {summary}").to_lowercase();
    const INTERN: &[&str] = &["intern", "co-op", "coop"];
    const JUNIOR: &[&str] = &["junior", "entry", "new grad"];
    const SENIOR: &[&str] = &["senior", "staff", "principal", "lead"];
    if INTERN.iter().any(|k| text.contains(k)) {
        0.80
    } else if JUNIOR.iter().any(|k| text.contains(k)) {
        0.50
    } else if SENIOR.iter().any(|k| text.contains(k)) {
        0.30
    } else {
        0.70
    }
}

/// Deterministic engine version over everything that can change a score.
/// Any input change advances the version and invalidates cached matches.
pub fn engine_version(
    config: &MatcherConfig,
    lexicon_digest: &str,
    skip_digest: &str,
    model_id: &str,
) -> String {
    let w = &config.weights;
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "weights={:.6},{:.6},{:.6},{:.6};threshold={:.6};top_k={};lexicon={lexicon_digest};skip={skip_digest};model={model_id};rev={ALGORITHM_REVISION}",
        w.keyword_match,
        w.semantic_coverage,
        w.semantic_strength,
        w.seniority_alignment,
        config.similarity_threshold,
        config.top_k,
    ));
    let digest = format!("{:x}", hasher.finalize());
    format!("v{ALGORITHM_REVISION}-{}", &digest[..16])
}
