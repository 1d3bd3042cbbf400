use std::cmp::Ordering;

use crate::config::AppConfig;
use crate::models::{Job, MatchResult};

/// Per-job verdict in streaming mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Keep,
    Drop,
    AutosaveToFolder,
}

/// Configuration-driven post-score predicates, shared by streaming
/// decisions and batch filtering. All predicates are conjunctive; empty
/// lists disable their filter.
pub struct FilterEngine {
    min_match_score: f64,
    auto_save_threshold: f64,
    preferred_locations: Vec<String>,
    keywords: Vec<String>,
    avoid_companies: Vec<String>,
}

impl FilterEngine {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            min_match_score: config.matcher.min_match_score,
            auto_save_threshold: config.matcher.auto_save_threshold,
            preferred_locations: normalize(&config.preferred_locations),
            keywords: normalize(&config.keywords_to_match),
            avoid_companies: normalize(&config.companies_to_avoid),
        }
    }

    fn passes(&self, job: &Job, result: &MatchResult) -> bool {
        if result.fit_score < self.min_match_score {
            return false;
        }
        if !self.preferred_locations.is_empty() && !self.location_matches(&job.location) {
            return false;
        }
        let company = job.company.to_lowercase();
        if self.avoid_companies.iter().any(|avoid| *avoid == company) {
            return false;
        }
        if !self.keywords.is_empty() {
            let haystack = format!("{} {}", job.title, job.summary).to_lowercase();
            if !self.keywords.iter().any(|kw| haystack.contains(kw)) {
                return false;
            }
        }
        true
    }

    /// Case-insensitive substring match, plus an exact "remote" token match
    /// so "Remote" preferences hit "Canada - remote" style locations.
    fn location_matches(&self, location: &str) -> bool {
        let location = location.to_lowercase();
        self.preferred_locations.iter().any(|preferred| {
            location.contains(preferred)
                || (preferred == "remote"
                    && location
                        .split(|c: char| !c.is_ascii_alphanumeric())
                        .any(|token| token == "remote"))
        })
    }

    pub fn decide_realtime(&self, job: &Job, result: &MatchResult) -> Decision {
        if !self.passes(job, result) {
            Decision::Drop
        } else if result.fit_score >= self.auto_save_threshold {
            Decision::AutosaveToFolder
        } else {
            Decision::Keep
        }
    }

    /// Filter and rank: fit score descending, ties by job id ascending.
    pub fn apply_batch(&self, results: Vec<(Job, MatchResult)>) -> Vec<(Job, MatchResult)> {
        let mut kept: Vec<(Job, MatchResult)> = results
            .into_iter()
            .filter(|(job, result)| self.passes(job, result))
            .collect();
        sort_by_fit(&mut kept);
        kept
    }
}

pub fn sort_by_fit(results: &mut [(Job, MatchResult)]) {
    results.sort_by(|a, b| {
        b.1.fit_score
            .partial_cmp(&a.1.fit_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.job_id.cmp(&b.0.job_id))
    });
}

fn normalize(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}
