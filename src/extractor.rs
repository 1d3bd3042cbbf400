use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::lexicon::TechLexicon;
use crate::models::Job;

/// Boilerplate phrases that mark a line as filler rather than a requirement.
/// Matching is case-insensitive substring.
pub const DEFAULT_SKIP_PHRASES: &[&str] = &[
    "strong communication",
    "team player",
    "attention to detail",
    "problem solving",
    "time management",
    "organizational skills",
    "interpersonal skills",
    "written communication",
    "verbal communication",
    "self-motivated",
    "quick learner",
    "work independently",
    "work in a team",
    "fast-paced environment",
    "strong work ethic",
    "commitment to quality",
    "strong technical writing",
    "technical writing skills",
    "strong motivation",
    "quality and achieving deadlines",
];

/// Verbs that mark a sentence as an actionable requirement even without a
/// technology hit. Matched as word prefixes so "tests"/"testing" count.
const ACTION_VERBS: &[&str] = &[
    "develop",
    "build",
    "design",
    "implement",
    "architect",
    "deploy",
    "debug",
    "test",
    "optimize",
    "integrate",
    "maintain",
    "analyze",
    "evaluate",
    "document",
];

/// Minimum candidate length; anything shorter is template noise.
const MIN_REQUIREMENT_CHARS: usize = 15;

/// The noise skip list, externally loadable. Its digest feeds the engine
/// version so edits invalidate cached matches.
pub struct SkipPhrases {
    phrases: Vec<String>,
    digest: String,
}

impl SkipPhrases {
    pub fn with_defaults() -> Self {
        Self::from_phrases(DEFAULT_SKIP_PHRASES.iter().map(|p| p.to_string()).collect())
    }

    /// Load from a JSON file holding a list of phrases.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read skip list {}: {e}", path.display())))?;
        let phrases: Vec<String> = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid skip list {}: {e}", path.display())))?;
        Ok(Self::from_phrases(phrases))
    }

    fn from_phrases(phrases: Vec<String>) -> Self {
        let phrases: Vec<String> = phrases
            .into_iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        let mut hasher = Sha256::new();
        for phrase in &phrases {
            hasher.update(phrase.as_bytes());
            hasher.update([0x0a]);
        }
        Self {
            digest: format!("{:x}", hasher.finalize()),
            phrases,
        }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    fn matches(&self, candidate_lower: &str) -> bool {
        self.phrases.iter().any(|p| candidate_lower.contains(p))
    }
}

/// Decompose a posting's responsibilities and skills sections into an
/// ordered list of requirement statements. An empty result is valid.
pub fn extract_requirements(job: &Job, lexicon: &TechLexicon, skip: &SkipPhrases) -> Vec<String> {
    let mut requirements = Vec::new();
    let mut seen = BTreeSet::new();

    for section in [&job.responsibilities, &job.skills] {
        for line in section.lines() {
            for candidate in split_sentences(line) {
                let candidate = candidate.trim();
                if candidate.chars().count() < MIN_REQUIREMENT_CHARS {
                    continue;
                }
                if candidate.ends_with(':') {
                    continue;
                }
                let lower = candidate.to_lowercase();
                if skip.matches(&lower) {
                    continue;
                }
                if is_title_echo(&lower, &job.title) {
                    continue;
                }
                if !has_signal(candidate, &lower, lexicon) {
                    continue;
                }
                if seen.insert(lower) {
                    requirements.push(candidate.to_string());
                }
            }
        }
    }

    requirements
}

/// Split on sentence terminators followed by whitespace, keeping the
/// terminator with its sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    for (i, &(pos, ch)) in chars.iter().enumerate() {
        if matches!(ch, '.' | '!' | '?') {
            if let Some(&(next_pos, next_ch)) = chars.get(i + 1) {
                if next_ch.is_whitespace() {
                    parts.push(&text[start..pos + ch.len_utf8()]);
                    start = next_pos;
                }
            }
        }
    }
    if start < text.len() {
        parts.push(&text[start..]);
    }
    parts
}

/// "Experience in <title> role" where <title> echoes the posting title adds
/// nothing; the original generator injected these.
fn is_title_echo(candidate_lower: &str, title: &str) -> bool {
    let body = candidate_lower.trim_end_matches('.').trim();
    let Some(rest) = body.strip_prefix("experience in ") else {
        return false;
    };
    let Some(role) = rest.strip_suffix(" role") else {
        return false;
    };
    !role.is_empty() && title.to_lowercase().contains(role)
}

fn has_signal(candidate: &str, candidate_lower: &str, lexicon: &TechLexicon) -> bool {
    if lexicon.contains_any(candidate) {
        return true;
    }
    candidate_lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .any(|word| ACTION_VERBS.iter().any(|verb| word.starts_with(verb)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexicon() -> TechLexicon {
        TechLexicon::with_default_terms().unwrap()
    }

    fn job_with(responsibilities: &str, skills: &str, title: &str) -> Job {
        Job {
            job_id: "J1".into(),
            title: title.into(),
            responsibilities: responsibilities.into(),
            skills: skills.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_fluff_filter() {
        let job = job_with(
            "Required Skills:\nStrong communication skills.\nTeam player.\nExperience with Docker and Kubernetes.\nWrite unit tests.",
            "",
            "Software Developer",
        );
        let reqs = extract_requirements(&job, &lexicon(), &SkipPhrases::with_defaults());
        assert_eq!(
            reqs,
            vec![
                "Experience with Docker and Kubernetes.".to_string(),
                "Write unit tests.".to_string(),
            ]
        );
    }

    #[test]
    fn test_title_echo_dropped() {
        let job = job_with(
            "Experience in Software Developer role.\nDevelop backend services in Python.",
            "",
            "Software Developer - Co-op",
        );
        let reqs = extract_requirements(&job, &lexicon(), &SkipPhrases::with_defaults());
        assert_eq!(reqs, vec!["Develop backend services in Python.".to_string()]);
    }

    #[test]
    fn test_sentence_split_preserves_terminators() {
        assert_eq!(
            split_sentences("Build APIs. Ship features! Keep learning?"),
            vec!["Build APIs.", "Ship features!", "Keep learning?"]
        );
        // No whitespace after the dot means no split (e.g. "Node.js").
        assert_eq!(split_sentences("Work with Node.js daily"), vec!["Work with Node.js daily"]);
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let job = job_with(
            "Develop data pipelines in Python.",
            "develop data pipelines in python.",
            "Data Engineer",
        );
        let reqs = extract_requirements(&job, &lexicon(), &SkipPhrases::with_defaults());
        assert_eq!(reqs, vec!["Develop data pipelines in Python.".to_string()]);
    }

    #[test]
    fn test_no_signal_dropped() {
        let job = job_with(
            "Assist the regional office with misc paperwork duties.",
            "",
            "Office Assistant",
        );
        let reqs = extract_requirements(&job, &lexicon(), &SkipPhrases::with_defaults());
        assert!(reqs.is_empty());
    }

    #[test]
    fn test_action_verb_prefix_matching() {
        let job = job_with("Testing embedded firmware daily.", "", "Firmware Intern");
        let reqs = extract_requirements(&job, &lexicon(), &SkipPhrases::with_defaults());
        assert_eq!(reqs.len(), 1);
    }

    #[test]
    fn test_empty_sections_yield_empty() {
        let job = job_with("", "", "Anything");
        assert!(extract_requirements(&job, &lexicon(), &SkipPhrases::with_defaults()).is_empty());
    }

    #[test]
    fn test_skip_list_digest_changes() {
        let a = SkipPhrases::with_defaults();
        let b = SkipPhrases::from_phrases(vec!["team player".into()]);
        assert_ne!(a.digest(), b.digest());
    }
}
