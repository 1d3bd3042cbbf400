use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use headless_chrome::browser::default_executable;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{ApplyOutcome, Job, JobRow};

/// Kinds of documents the portal accepts per application package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum DocumentKind {
    Resume,
    CoverLetter,
    Transcript,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Resume => "resume",
            DocumentKind::CoverLetter => "cover-letter",
            DocumentKind::Transcript => "transcript",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Skip jobs whose apply flow presents pre-screening questions.
    pub skip_prescreen: bool,
    /// Cover letter file to attach to the application package.
    pub cover_letter_path: Option<PathBuf>,
}

/// Authenticated portal session. Owns one browser instance and is not
/// thread-safe; all calls run on one logical stream. `close` is idempotent
/// and never raises.
pub trait PortalSession {
    fn login(&mut self) -> Result<()>;

    /// Enumerate posting rows, optionally from a saved folder. The sequence
    /// is finite and not restartable; callers materialize it.
    fn iterate_jobs(&mut self, folder: Option<&str>) -> Result<Vec<JobRow>>;

    fn fetch_detail(&mut self, job_id: &str) -> Result<Job>;

    fn save_to_folder(&mut self, job_id: &str, folder: &str) -> Result<()>;

    fn apply(&mut self, job_id: &str, options: &ApplyOptions) -> Result<ApplyOutcome>;

    fn upload_document(&mut self, job_id: &str, path: &Path, kind: DocumentKind) -> Result<()>;

    fn close(&mut self);
}

const LOGIN_WAIT: Duration = Duration::from_secs(120);

/// Chrome-backed portal driver. Selectors follow the portal's data-viewer
/// markup; every wait is bounded so a stuck page surfaces as a fetch error
/// rather than a hang.
pub struct ChromePortal {
    base_url: String,
    username: String,
    password: String,
    headless: bool,
    element_timeout: Duration,
    detail_timeout: Duration,
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
}

impl ChromePortal {
    pub fn new(base_url: &str, username: &str, password: &str, headless: bool) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            headless,
            element_timeout: Duration::from_secs(10),
            detail_timeout: Duration::from_secs(30),
            browser: None,
            tab: None,
        }
    }

    fn launch(&mut self) -> Result<()> {
        if self.tab.is_some() {
            return Ok(());
        }
        let args: Vec<&OsStr> = vec![
            OsStr::new("--no-first-run"),
            OsStr::new("--no-default-browser-check"),
            OsStr::new("--disable-sync"),
            OsStr::new("--disable-features=TranslateUI"),
        ];
        let options = LaunchOptions {
            headless: self.headless,
            sandbox: true,
            path: default_executable().ok(),
            args,
            ..Default::default()
        };
        let browser = Browser::new(options)
            .map_err(|e| Error::Auth(format!("failed to launch Chrome: {e}")))?;
        let tab = browser
            .new_tab()
            .map_err(|e| Error::Auth(format!("failed to open browser tab: {e}")))?;
        self.browser = Some(browser);
        self.tab = Some(tab);
        Ok(())
    }

    fn tab(&self) -> Result<&Arc<Tab>> {
        self.tab
            .as_ref()
            .ok_or_else(|| Error::Portal("session not started; call login first".to_string()))
    }

    fn goto(&self, url: &str) -> Result<()> {
        let tab = self.tab()?;
        tab.navigate_to(url)
            .map_err(|e| Error::Portal(format!("navigation to {url} failed: {e}")))?;
        tab.wait_until_navigated()
            .map_err(|e| Error::Portal(format!("page load for {url} failed: {e}")))?;
        Ok(())
    }

    fn job_url(&self, job_id: &str) -> String {
        format!("{}/myAccount/co-op/full/jobs.htm?jobId={job_id}", self.base_url)
    }

    fn auth_wall_present(&self) -> Result<bool> {
        let tab = self.tab()?;
        for selector in [
            "input[name='session_key']",
            "input[type='password']",
            ".authwall",
        ] {
            if tab.find_element(selector).is_ok() {
                return Ok(true);
            }
        }
        let url = tab.get_url();
        Ok(url.contains("/login") || url.contains("/cas/"))
    }

    /// Probe selectors in order and return the first non-empty inner text.
    fn first_text(&self, selectors: &[&str]) -> Option<String> {
        let tab = self.tab.as_ref()?;
        for selector in selectors {
            if let Ok(element) = tab.find_element(selector) {
                if let Ok(text) = element.get_inner_text() {
                    let text = text.trim().to_string();
                    if !text.is_empty() {
                        return Some(text);
                    }
                }
            }
        }
        None
    }

    fn labeled_section(&self, label: &str) -> String {
        let selectors = [
            format!("[data-field='{label}']"),
            format!("#{label}"),
            format!(".posting--{label}"),
        ];
        let refs: Vec<&str> = selectors.iter().map(String::as_str).collect();
        self.first_text(&refs).unwrap_or_default()
    }

    fn click_first(&self, selectors: &[&str]) -> Result<()> {
        let tab = self.tab()?;
        for selector in selectors {
            if let Ok(element) = tab.find_element(selector) {
                if element.click().is_ok() {
                    return Ok(());
                }
            }
        }
        Err(Error::Portal(format!(
            "none of the expected controls were clickable: {selectors:?}"
        )))
    }
}

impl PortalSession for ChromePortal {
    fn login(&mut self) -> Result<()> {
        self.launch()?;
        info!("logging into portal");
        self.goto(&format!("{}/home.htm", self.base_url))
            .map_err(|e| Error::Auth(e.to_string()))?;

        let tab = self.tab()?;
        let user_field = tab
            .wait_for_element_with_custom_timeout("input#username, input[name='username']", self.element_timeout)
            .map_err(|e| Error::Auth(format!("login form not found: {e}")))?;
        user_field
            .click()
            .map_err(|e| Error::Auth(format!("cannot focus username field: {e}")))?;
        tab.type_str(&self.username)
            .map_err(|e| Error::Auth(format!("cannot enter username: {e}")))?;

        let password_field = tab
            .find_element("input[type='password']")
            .map_err(|e| Error::Auth(format!("password field not found: {e}")))?;
        password_field
            .click()
            .map_err(|e| Error::Auth(format!("cannot focus password field: {e}")))?;
        tab.type_str(&self.password)
            .map_err(|e| Error::Auth(format!("cannot enter password: {e}")))?;
        tab.press_key("Enter")
            .map_err(|e| Error::Auth(format!("cannot submit login form: {e}")))?;

        // 2FA approval can take a while; wait for the dashboard shell.
        tab.wait_for_element_with_custom_timeout(".dashboard--header, nav.navbar, .orbisApp", LOGIN_WAIT)
            .map_err(|e| Error::Auth(format!("login did not reach the dashboard: {e}")))?;

        if self.auth_wall_present()? {
            return Err(Error::Auth(
                "still on the login page after submitting credentials".to_string(),
            ));
        }
        info!("portal login complete");
        Ok(())
    }

    fn iterate_jobs(&mut self, folder: Option<&str>) -> Result<Vec<JobRow>> {
        let url = match folder {
            Some(folder) => format!(
                "{}/myAccount/co-op/full/jobs.htm?folder={folder}",
                self.base_url
            ),
            None => format!("{}/myAccount/co-op/full/jobs.htm", self.base_url),
        };
        self.goto(&url)?;

        let tab = self.tab()?;
        tab.wait_for_element_with_custom_timeout("table.data-viewer-table", self.element_timeout)
            .map_err(|e| Error::Portal(format!("job table did not load: {e}")))?;

        let mut rows = Vec::new();
        // Bounded page walk; the pagination control disappears on the last page.
        for page in 1..=200 {
            let elements = tab
                .find_elements("table.data-viewer-table tbody tr")
                .map_err(|e| Error::Portal(format!("cannot read job rows: {e}")))?;
            for element in elements {
                let Ok(text) = element.get_inner_text() else {
                    continue;
                };
                if let Some(row) = parse_job_row(&text, &self.base_url) {
                    rows.push(row);
                }
            }
            debug!(page, total = rows.len(), "scanned job table page");

            let next = tab.find_element(".pagination li:last-child:not(.disabled) a");
            match next {
                Ok(next) if next.click().is_ok() => {
                    tab.wait_until_navigated().ok();
                    std::thread::sleep(Duration::from_millis(500));
                }
                _ => break,
            }
        }

        // Re-listing the same posting across pages happens when sorting
        // shifts under pagination; keep the first sighting.
        let mut seen = std::collections::HashSet::new();
        rows.retain(|row| seen.insert(row.job_id.clone()));
        info!(jobs = rows.len(), "enumerated portal postings");
        Ok(rows)
    }

    fn fetch_detail(&mut self, job_id: &str) -> Result<Job> {
        let fetch_err = |reason: String| Error::Fetch {
            job_id: job_id.to_string(),
            reason,
        };

        self.goto(&self.job_url(job_id))
            .map_err(|e| fetch_err(e.to_string()))?;
        let tab = self.tab()?;
        tab.wait_for_element_with_custom_timeout(".posting--header, .job--posting", self.detail_timeout)
            .map_err(|e| fetch_err(format!("posting view did not load: {e}")))?;

        let title = self
            .first_text(&[".posting--header h1", "h1.job--title"])
            .ok_or_else(|| fetch_err("posting has no title".to_string()))?;
        let company = self
            .first_text(&[".posting--header .company", ".job--company"])
            .unwrap_or_default();

        let job = Job {
            job_id: job_id.to_string(),
            title,
            company,
            division: non_empty(self.labeled_section("division")),
            location: self.labeled_section("location"),
            level: non_empty(self.labeled_section("level")),
            openings: parse_count(&self.labeled_section("openings")),
            applications: parse_count(&self.labeled_section("applications")),
            deadline: non_empty(self.labeled_section("deadline")),
            summary: self.labeled_section("summary"),
            responsibilities: self.labeled_section("responsibilities"),
            skills: self.labeled_section("skills"),
            additional_info: self.labeled_section("additional_info"),
            employment_location_arrangement: self.labeled_section("employment_location_arrangement"),
            work_term_duration: self.labeled_section("work_term_duration"),
            compensation_raw: non_empty(self.labeled_section("compensation")),
            application_documents_required: split_list(&self.labeled_section("application_documents")),
            targeted_degrees_disciplines: split_list(&self.labeled_section("targeted_disciplines")),
            is_active: true,
            ..Default::default()
        };
        debug!(job_id, title = %job.title, "fetched posting detail");
        Ok(job)
    }

    fn save_to_folder(&mut self, job_id: &str, folder: &str) -> Result<()> {
        self.goto(&self.job_url(job_id))?;
        self.click_first(&["button[aria-label='Save posting']", "button.btn--save"])?;

        let tab = self.tab()?;
        let options = tab
            .find_elements(".folder--menu li, .saved-folder-option")
            .map_err(|e| Error::Portal(format!("folder menu did not open: {e}")))?;
        for option in options {
            if let Ok(text) = option.get_inner_text() {
                if text.trim().eq_ignore_ascii_case(folder) {
                    option
                        .click()
                        .map_err(|e| Error::Portal(format!("cannot select folder: {e}")))?;
                    info!(job_id, folder, "saved posting to folder");
                    return Ok(());
                }
            }
        }
        Err(Error::Portal(format!("folder '{folder}' not found in save menu")))
    }

    fn apply(&mut self, job_id: &str, options: &ApplyOptions) -> Result<ApplyOutcome> {
        self.goto(&self.job_url(job_id))?;

        if let Some(info) = self.first_text(&["[data-field='additional_info']"]) {
            let info = info.to_lowercase();
            if info.contains("apply externally") || info.contains("company website") {
                return Ok(ApplyOutcome::SkippedExternal);
            }
        }
        if let Some(docs) = self.first_text(&["[data-field='application_documents']"]) {
            if requires_extra_documents(&docs) {
                return Ok(ApplyOutcome::SkippedExtraDocs);
            }
        }

        self.click_first(&["button.applyButton", "a.btn--apply"])?;
        let tab = self.tab()?;
        tab.wait_for_element_with_custom_timeout(".application--wizard, .modal--apply", self.detail_timeout)
            .map_err(|e| Error::Portal(format!("apply dialog did not open: {e}")))?;

        if options.skip_prescreen
            && tab.find_element(".prescreening--questions, .pre-screening").is_ok()
        {
            return Ok(ApplyOutcome::SkippedPrescreen);
        }

        if let Some(path) = &options.cover_letter_path {
            self.upload_document(job_id, path, DocumentKind::CoverLetter)?;
        }

        match self.click_first(&["button[type='submit'].btn--primary", "button.submitApplication"]) {
            Ok(()) => {
                info!(job_id, "application submitted");
                Ok(ApplyOutcome::Submitted)
            }
            Err(e) => {
                warn!(job_id, "apply submit failed: {e}");
                Ok(ApplyOutcome::Failed)
            }
        }
    }

    fn upload_document(&mut self, job_id: &str, path: &Path, kind: DocumentKind) -> Result<()> {
        if !path.exists() {
            return Err(Error::Portal(format!(
                "document {} does not exist",
                path.display()
            )));
        }
        let tab = self.tab()?;
        let input = tab
            .wait_for_element_with_custom_timeout("input[type='file']", self.element_timeout)
            .map_err(|e| Error::Portal(format!("file input not found: {e}")))?;
        let path_str = path.to_string_lossy();
        input
            .set_input_files(&[path_str.as_ref()])
            .map_err(|e| Error::Portal(format!("file upload failed: {e}")))?;
        info!(job_id, kind = kind.as_str(), file = %path.display(), "uploaded document");
        Ok(())
    }

    fn close(&mut self) {
        if self.browser.take().is_some() {
            debug!("closing portal browser");
        }
        self.tab = None;
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// First integer found in the text, else 0.
fn parse_count(text: &str) -> i64 {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

fn split_list(text: &str) -> Vec<String> {
    text.split([',', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// An application package is only automatable when it asks for nothing
/// beyond a resume and a cover letter.
fn requires_extra_documents(required: &str) -> bool {
    required
        .split([',', '\n'])
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .any(|d| {
            let d = d.to_lowercase();
            !(d.contains("resume") || d.contains("r\u{e9}sum\u{e9}") || d.contains("cover letter"))
        })
}

/// Parse one table row's inner text into a JobRow. Cells arrive separated by
/// newlines or tabs; the first all-digit cell is the posting id, followed by
/// title and company.
fn parse_job_row(text: &str, base_url: &str) -> Option<JobRow> {
    let cells: Vec<&str> = text
        .split(['\n', '\t'])
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    let id_pos = cells
        .iter()
        .position(|c| c.len() >= 5 && c.chars().all(|ch| ch.is_ascii_digit()))?;
    let job_id = cells[id_pos];
    let title = cells.get(id_pos + 1)?;
    let company = cells.get(id_pos + 2)?;
    Some(JobRow {
        job_id: job_id.to_string(),
        title: title.to_string(),
        company: company.to_string(),
        href: format!("{base_url}/myAccount/co-op/full/jobs.htm?jobId={job_id}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_row() {
        let row = parse_job_row(
            "\u{2606}\n412233\nSoftware Developer - Co-op\nMaple Systems\nToronto, ON\n25",
            "https://portal.example",
        )
        .unwrap();
        assert_eq!(row.job_id, "412233");
        assert_eq!(row.title, "Software Developer - Co-op");
        assert_eq!(row.company, "Maple Systems");
        assert!(row.href.contains("jobId=412233"));
    }

    #[test]
    fn test_parse_job_row_rejects_non_rows() {
        assert!(parse_job_row("No postings found", "x").is_none());
        assert!(parse_job_row("", "x").is_none());
        // Header rows carry no posting id.
        assert!(parse_job_row("ID\nTitle\nCompany", "x").is_none());
    }

    #[test]
    fn test_requires_extra_documents() {
        assert!(!requires_extra_documents("Resume, Cover Letter"));
        assert!(!requires_extra_documents("Cover Letter"));
        assert!(requires_extra_documents("Resume, Cover Letter, Transcript"));
        assert!(requires_extra_documents("Portfolio"));
        assert!(!requires_extra_documents(""));
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("3 openings"), 3);
        assert_eq!(parse_count("Applications: 41"), 41);
        assert_eq!(parse_count("n/a"), 0);
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list("Resume, Cover Letter,\nTranscript"),
            vec!["Resume".to_string(), "Cover Letter".into(), "Transcript".into()]
        );
        assert!(split_list("").is_empty());
    }
}
