use serde::{Deserialize, Serialize};

/// A scraped posting. `job_id` is the portal's identifier and the sole
/// external identity; contents may change on rescrape while the id stays
/// stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub title: String,
    pub company: String,
    pub division: Option<String>,
    pub location: String,
    pub level: Option<String>,
    pub openings: i64,
    pub applications: i64,
    pub deadline: Option<String>,
    pub summary: String,
    pub responsibilities: String,
    pub skills: String,
    pub additional_info: String,
    pub employment_location_arrangement: String,
    pub work_term_duration: String,
    pub compensation_raw: Option<String>,
    pub compensation_value: Option<f64>,
    pub compensation_currency: Option<String>,
    pub compensation_period: Option<String>,
    pub application_documents_required: Vec<String>,
    pub targeted_degrees_disciplines: Vec<String>,
    pub is_active: bool,
    pub scraped_at: String,
    pub updated_at: String,
}

impl Job {
    /// All free-text sections joined. This is the haystack for technology
    /// extraction; title and company stay out of it.
    pub fn sections_text(&self) -> String {
        [
            self.summary.as_str(),
            self.responsibilities.as_str(),
            self.skills.as_str(),
            self.additional_info.as_str(),
            self.employment_location_arrangement.as_str(),
            self.work_term_duration.as_str(),
        ]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
    }
}

/// One row of the portal's posting table, before detail fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRow {
    pub job_id: String,
    pub title: String,
    pub company: String,
    pub href: String,
}

/// Per-requirement evidence: which resume bullet answered it best, and
/// whether that was good enough to count as covered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub requirement: String,
    pub bullet_index: Option<usize>,
    pub similarity: f64,
    pub covered: bool,
}

/// The matcher's verdict for one job. Overwritten on re-score; stale when
/// `analysis_version` no longer matches the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub job_id: String,
    pub fit_score: f64,
    pub keyword_match: f64,
    pub semantic_coverage: f64,
    pub semantic_strength: f64,
    pub seniority_alignment: f64,
    pub matched_technologies: Vec<String>,
    pub missing_technologies: Vec<String>,
    pub evidence: Vec<Evidence>,
    pub analysis_version: String,
    pub analyzed_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverLetter {
    pub letter_id: i64,
    pub job_id: String,
    pub content: String,
    pub file_path: Option<String>,
    pub provider: String,
    pub word_count: i64,
    pub generated_at: String,
    pub is_uploaded: bool,
    pub uploaded_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplicationStatus {
    Draft,
    Submitted,
    SkippedExternal,
    SkippedExtraDocs,
    SkippedPrescreen,
    Failed,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Draft => "draft",
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::SkippedExternal => "skipped-external",
            ApplicationStatus::SkippedExtraDocs => "skipped-extra-docs",
            ApplicationStatus::SkippedPrescreen => "skipped-prescreen",
            ApplicationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ApplicationStatus::Draft),
            "submitted" => Some(ApplicationStatus::Submitted),
            "skipped-external" => Some(ApplicationStatus::SkippedExternal),
            "skipped-extra-docs" => Some(ApplicationStatus::SkippedExtraDocs),
            "skipped-prescreen" => Some(ApplicationStatus::SkippedPrescreen),
            "failed" => Some(ApplicationStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub application_id: i64,
    pub job_id: String,
    pub status: ApplicationStatus,
    pub letter_id: Option<i64>,
    pub documents: Vec<String>,
    pub submitted_at: String,
}

/// Outcome of driving the portal's apply flow for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Submitted,
    SkippedPrescreen,
    SkippedExtraDocs,
    SkippedExternal,
    Failed,
}

impl ApplyOutcome {
    pub fn status(self) -> ApplicationStatus {
        match self {
            ApplyOutcome::Submitted => ApplicationStatus::Submitted,
            ApplyOutcome::SkippedPrescreen => ApplicationStatus::SkippedPrescreen,
            ApplyOutcome::SkippedExtraDocs => ApplicationStatus::SkippedExtraDocs,
            ApplyOutcome::SkippedExternal => ApplicationStatus::SkippedExternal,
            ApplyOutcome::Failed => ApplicationStatus::Failed,
        }
    }
}

/// Normalized compensation, parsed from the raw posting string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Compensation {
    pub value: Option<f64>,
    pub currency: Option<String>,
    pub period: Option<String>,
}
