use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::ai::{self, LlmProvider};
use crate::cache::MatchCache;
use crate::config::AppConfig;
use crate::db::{Database, RunRecord};
use crate::error::{Error, Result};
use crate::filter::{sort_by_fit, Decision, FilterEngine};
use crate::matcher::Matcher;
use crate::models::{Job, MatchResult};
use crate::portal::PortalSession;
use crate::report;

/// Cooperative cancellation flag, checked between jobs. Cancellation never
/// interrupts a transaction in progress; it only prevents starting the next
/// job.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Ignore cached match results and recompute every score.
    pub force_rematch: bool,
    /// Batch mode: push qualifying jobs to the portal folder after scoring.
    pub auto_save: bool,
    /// Stop after this many enumerated jobs.
    pub max_jobs: Option<usize>,
    /// Portal folder override for autosave.
    pub folder: Option<String>,
}

/// Outcome counters plus the final ranked view.
#[derive(Debug, Default)]
pub struct RunReport {
    pub jobs_seen: usize,
    pub jobs_scored: usize,
    pub cache_hits: u64,
    pub errors: usize,
    pub saved_to_folder: usize,
    pub results: Vec<(Job, MatchResult)>,
}

/// Drives scrape -> extract -> score -> filter -> persist. The pipeline is
/// the sole decision point for fatal vs isolated errors; the portal session
/// is closed exactly once on every exit path.
pub struct Pipeline<'a> {
    db: &'a Database,
    matcher: &'a Matcher,
    filter: &'a FilterEngine,
    config: &'a AppConfig,
    llm: Option<&'a dyn LlmProvider>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        db: &'a Database,
        matcher: &'a Matcher,
        filter: &'a FilterEngine,
        config: &'a AppConfig,
        llm: Option<&'a dyn LlmProvider>,
    ) -> Self {
        Self {
            db,
            matcher,
            filter,
            config,
            llm,
        }
    }

    /// Fill the normalized compensation columns from the raw posting string:
    /// the LLM when one is configured, a regex fallback otherwise. Parse
    /// failures leave the raw string as the only record.
    fn normalize_compensation(&self, job: &mut Job) {
        if job.compensation_value.is_some() {
            return;
        }
        let Some(raw) = job.compensation_raw.clone() else {
            return;
        };
        let parsed = match self.llm {
            Some(llm) => ai::extract_compensation(llm, &raw).unwrap_or_else(|err| {
                warn!(job_id = %job.job_id, stage = "compensation", "{err}");
                ai::fallback_compensation(&raw)
            }),
            None => ai::fallback_compensation(&raw),
        };
        job.compensation_value = parsed.value;
        job.compensation_currency = parsed.currency;
        job.compensation_period = parsed.period;
    }

    /// Batch mode: enumerate and persist everything first, then score all
    /// active jobs through the cache, filter, and export artifacts.
    pub fn run_batch(
        &self,
        portal: &mut dyn PortalSession,
        options: &RunOptions,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        let outcome = self.batch_inner(portal, options, cancel);
        // close() is idempotent and never raises; failures inside the
        // driver are its own to log.
        portal.close();
        outcome
    }

    fn batch_inner(
        &self,
        portal: &mut dyn PortalSession,
        options: &RunOptions,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        let started_at = Utc::now().to_rfc3339();
        portal.login()?;

        let rows = portal.iterate_jobs(None)?;
        let limit = options.max_jobs.unwrap_or(usize::MAX);
        info!(rows = rows.len(), "enumerated job rows");

        let mut report = RunReport::default();
        let mut seen_ids: Vec<String> = Vec::new();
        let mut checkpoint: Vec<Job> = Vec::new();

        for row in rows.iter().take(limit) {
            if cancel.is_cancelled() {
                self.db.upsert_jobs(&checkpoint)?;
                return Err(Error::Cancelled);
            }
            match portal.fetch_detail(&row.job_id) {
                Ok(mut job) => {
                    self.normalize_compensation(&mut job);
                    seen_ids.push(job.job_id.clone());
                    checkpoint.push(job);
                    report.jobs_seen += 1;
                }
                Err(err) if !err.is_fatal() => {
                    warn!(job_id = %row.job_id, stage = "fetch", "{err}");
                    report.errors += 1;
                }
                Err(fatal) => {
                    self.db.upsert_jobs(&checkpoint)?;
                    return Err(fatal);
                }
            }
            if checkpoint.len() >= self.config.scrape_checkpoint_every {
                self.db.upsert_jobs(&checkpoint)?;
                checkpoint.clear();
            }
        }
        self.db.upsert_jobs(&checkpoint)?;

        // Only a full enumeration says anything about disappeared postings.
        if options.max_jobs.is_none() {
            let inactive = self.db.mark_active_set(&seen_ids)?;
            if inactive > 0 {
                info!(inactive, "marked disappeared postings inactive");
            }
        }

        let mut scored = self.score_all(options.force_rematch, cancel, &mut report)?;

        if options.auto_save {
            let folder = options
                .folder
                .clone()
                .unwrap_or_else(|| self.config.portal_folder.clone());
            for (job, m) in &scored {
                if m.fit_score >= self.config.matcher.auto_save_threshold
                    && !self.db.is_in_folder(&job.job_id, &folder)?
                {
                    match portal.save_to_folder(&job.job_id, &folder) {
                        Ok(()) => {
                            self.db.save_folder_membership(&job.job_id, &folder)?;
                            report.saved_to_folder += 1;
                        }
                        Err(err) => {
                            warn!(job_id = %job.job_id, stage = "autosave", "{err}");
                            report.errors += 1;
                        }
                    }
                }
            }
        }

        self.export_artifacts(&scored)?;
        report.results = std::mem::take(&mut scored);
        self.record_run("batch", &started_at, &report)?;
        Ok(report)
    }

    /// Streaming mode: fetch, persist, score, and act on each job before
    /// advancing to the next. Per-job failures are isolated.
    pub fn run_stream(
        &self,
        portal: &mut dyn PortalSession,
        options: &RunOptions,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        let outcome = self.stream_inner(portal, options, cancel);
        portal.close();
        outcome
    }

    fn stream_inner(
        &self,
        portal: &mut dyn PortalSession,
        options: &RunOptions,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        let started_at = Utc::now().to_rfc3339();
        portal.login()?;

        let rows = portal.iterate_jobs(None)?;
        let limit = options.max_jobs.unwrap_or(usize::MAX);
        let folder = options
            .folder
            .clone()
            .unwrap_or_else(|| self.config.portal_folder.clone());

        let mut report = RunReport::default();
        let mut cache = MatchCache::new(self.db, self.matcher.version().to_string());
        let mut kept: Vec<(Job, MatchResult)> = Vec::new();

        for row in rows.iter().take(limit) {
            if cancel.is_cancelled() {
                report.cache_hits = cache.hits();
                self.record_run("stream", &started_at, &report)?;
                return Err(Error::Cancelled);
            }

            let mut job = match portal.fetch_detail(&row.job_id) {
                Ok(job) => job,
                Err(err) if !err.is_fatal() => {
                    warn!(job_id = %row.job_id, stage = "fetch", "{err}");
                    report.errors += 1;
                    continue;
                }
                Err(fatal) => return Err(fatal),
            };
            self.normalize_compensation(&mut job);
            let job = job;

            // Ordering guarantee: upsert_job -> upsert_match -> decision ->
            // portal action, all before the next row.
            self.db.upsert_job(&job)?;
            report.jobs_seen += 1;

            let before_misses = cache.misses();
            let m = match self.score_one(&job, options.force_rematch, &mut cache)? {
                Some(m) => m,
                None => {
                    report.errors += 1;
                    continue;
                }
            };
            if cache.misses() > before_misses || options.force_rematch {
                report.jobs_scored += 1;
            }

            match self.filter.decide_realtime(&job, &m) {
                Decision::Drop => {}
                Decision::Keep => kept.push((job, m)),
                Decision::AutosaveToFolder => {
                    if !self.db.is_in_folder(&job.job_id, &folder)? {
                        match portal.save_to_folder(&job.job_id, &folder) {
                            Ok(()) => {
                                self.db.save_folder_membership(&job.job_id, &folder)?;
                                report.saved_to_folder += 1;
                            }
                            Err(err) => {
                                // The match result stays untouched; only the
                                // folder action failed.
                                warn!(job_id = %job.job_id, stage = "autosave", "{err}");
                                report.errors += 1;
                            }
                        }
                    }
                    kept.push((job, m));
                }
            }
        }

        sort_by_fit(&mut kept);
        report.cache_hits = cache.hits();
        report.results = kept;
        self.record_run("stream", &started_at, &report)?;
        Ok(report)
    }

    /// Re-score persisted jobs without touching the portal.
    pub fn run_analyze(&self, options: &RunOptions, cancel: &CancelToken) -> Result<RunReport> {
        let started_at = Utc::now().to_rfc3339();
        let mut report = RunReport::default();
        let mut results =
            self.score_capped(options.force_rematch, options.max_jobs, cancel, &mut report)?;
        report.jobs_seen = results.len();
        self.export_artifacts(&results)?;
        report.results = std::mem::take(&mut results);
        self.record_run("analyze", &started_at, &report)?;
        Ok(report)
    }

    fn score_all(
        &self,
        force_rematch: bool,
        cancel: &CancelToken,
        report: &mut RunReport,
    ) -> Result<Vec<(Job, MatchResult)>> {
        self.score_capped(force_rematch, None, cancel, report)
    }

    fn score_capped(
        &self,
        force_rematch: bool,
        max_jobs: Option<usize>,
        cancel: &CancelToken,
        report: &mut RunReport,
    ) -> Result<Vec<(Job, MatchResult)>> {
        let mut cache = MatchCache::new(self.db, self.matcher.version().to_string());
        let mut scored = Vec::new();
        let jobs = self.db.list_jobs(true)?;
        let limit = max_jobs.unwrap_or(usize::MAX);
        for job in jobs.into_iter().take(limit) {
            if cancel.is_cancelled() {
                report.cache_hits = cache.hits();
                return Err(Error::Cancelled);
            }
            let before_misses = cache.misses();
            match self.score_one(&job, force_rematch, &mut cache)? {
                Some(m) => {
                    if cache.misses() > before_misses || force_rematch {
                        report.jobs_scored += 1;
                    }
                    scored.push((job, m));
                }
                None => report.errors += 1,
            }
        }
        report.cache_hits = cache.hits();
        Ok(self.filter.apply_batch(scored))
    }

    /// Score one job through the cache. `Ok(None)` means an isolated matcher
    /// failure: logged, nothing cached, the job keeps its last known match.
    fn score_one(
        &self,
        job: &Job,
        force_rematch: bool,
        cache: &mut MatchCache,
    ) -> Result<Option<MatchResult>> {
        if !force_rematch {
            if let Some(cached) = cache.lookup(&job.job_id)? {
                return Ok(Some(cached));
            }
        }
        match self.matcher.analyze(job) {
            Ok(m) => {
                cache.store(&m)?;
                Ok(Some(m))
            }
            Err(err) if !err.is_fatal() => {
                warn!(job_id = %job.job_id, stage = "match", "{err}");
                Ok(None)
            }
            Err(fatal) => Err(fatal),
        }
    }

    fn export_artifacts(&self, results: &[(Job, MatchResult)]) -> Result<()> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let json_path = self.config.data_dir.join(format!("matches_{stamp}.json"));
        let md_path = self.config.data_dir.join(format!("matches_{stamp}.md"));
        report::write_json_export(&json_path, results)?;
        report::write_markdown_report(&md_path, results)?;
        info!(json = %json_path.display(), markdown = %md_path.display(), "exported match artifacts");
        Ok(())
    }

    fn record_run(&self, mode: &str, started_at: &str, report: &RunReport) -> Result<()> {
        self.db.record_run(&RunRecord {
            mode: mode.to_string(),
            started_at: started_at.to_string(),
            finished_at: Utc::now().to_rfc3339(),
            jobs_seen: report.jobs_seen as i64,
            jobs_scored: report.jobs_scored as i64,
            cache_hits: report.cache_hits as i64,
            errors: report.errors as i64,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use crate::embedding::HashEmbedder;
    use crate::extractor::SkipPhrases;
    use crate::lexicon::TechLexicon;
    use crate::models::{ApplyOutcome, JobRow};
    use crate::portal::{ApplyOptions, DocumentKind};
    use crate::resume::ResumeIndex;

    struct FakePortal {
        jobs: Vec<Job>,
        fail_login: bool,
        fail_fetch: HashSet<String>,
        fail_save: HashSet<String>,
        cancel_on_fetch: Option<CancelToken>,
        save_calls: Vec<(String, String)>,
        close_calls: usize,
    }

    impl FakePortal {
        fn with_jobs(jobs: Vec<Job>) -> Self {
            Self {
                jobs,
                fail_login: false,
                fail_fetch: HashSet::new(),
                fail_save: HashSet::new(),
                cancel_on_fetch: None,
                save_calls: Vec::new(),
                close_calls: 0,
            }
        }
    }

    impl PortalSession for FakePortal {
        fn login(&mut self) -> Result<()> {
            if self.fail_login {
                return Err(Error::Auth("bad credentials".to_string()));
            }
            Ok(())
        }

        fn iterate_jobs(&mut self, _folder: Option<&str>) -> Result<Vec<JobRow>> {
            Ok(self
                .jobs
                .iter()
                .map(|j| JobRow {
                    job_id: j.job_id.clone(),
                    title: j.title.clone(),
                    company: j.company.clone(),
                    href: String::new(),
                })
                .collect())
        }

        fn fetch_detail(&mut self, job_id: &str) -> Result<Job> {
            if let Some(token) = &self.cancel_on_fetch {
                token.cancel();
            }
            if self.fail_fetch.contains(job_id) {
                return Err(Error::Fetch {
                    job_id: job_id.to_string(),
                    reason: "timeout".to_string(),
                });
            }
            self.jobs
                .iter()
                .find(|j| j.job_id == job_id)
                .cloned()
                .ok_or_else(|| Error::Fetch {
                    job_id: job_id.to_string(),
                    reason: "unknown job".to_string(),
                })
        }

        fn save_to_folder(&mut self, job_id: &str, folder: &str) -> Result<()> {
            if self.fail_save.contains(job_id) {
                return Err(Error::Portal("folder save failed".to_string()));
            }
            self.save_calls.push((job_id.to_string(), folder.to_string()));
            Ok(())
        }

        fn apply(&mut self, _job_id: &str, _options: &ApplyOptions) -> Result<ApplyOutcome> {
            Ok(ApplyOutcome::Submitted)
        }

        fn upload_document(
            &mut self,
            _job_id: &str,
            _path: &std::path::Path,
            _kind: DocumentKind,
        ) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) {
            self.close_calls += 1;
        }
    }

    fn posting(id: &str) -> Job {
        Job {
            job_id: id.to_string(),
            title: "Backend Developer - Co-op".to_string(),
            company: "Maple Systems".to_string(),
            location: "Toronto, ON".to_string(),
            summary: "Ship backend services with the platform team.".to_string(),
            skills: "Develop REST APIs in Python. Deploy containers with Docker.".to_string(),
            ..Default::default()
        }
    }

    struct TestStack {
        db: Database,
        matcher: Matcher,
        filter: FilterEngine,
        config: AppConfig,
    }

    impl TestStack {
        fn new(tag: &str, auto_save_threshold: f64) -> Self {
            let mut config = AppConfig::default();
            config.matcher.min_match_score = 0.0;
            config.matcher.auto_save_threshold = auto_save_threshold;
            config.data_dir = std::env::temp_dir()
                .join(format!("pipeline-test-{tag}-{}", std::process::id()));

            let provider = HashEmbedder;
            let index = ResumeIndex::build(
                vec![
                    "Built a Python REST API with PostgreSQL.".to_string(),
                    "Deployed services with Docker and Kubernetes.".to_string(),
                ],
                &provider,
            )
            .unwrap();
            let matcher = Matcher::new(
                Box::new(HashEmbedder),
                index,
                TechLexicon::with_default_terms().unwrap(),
                SkipPhrases::with_defaults(),
                config.matcher.clone(),
            );
            let filter = FilterEngine::new(&config);
            let db = Database::open_in_memory().unwrap();
            Self {
                db,
                matcher,
                filter,
                config,
            }
        }

        fn pipeline(&self) -> Pipeline<'_> {
            Pipeline::new(&self.db, &self.matcher, &self.filter, &self.config, None)
        }

        fn cleanup(&self) {
            std::fs::remove_dir_all(&self.config.data_dir).ok();
        }
    }

    #[test]
    fn test_batch_scores_and_persists() {
        let stack = TestStack::new("batch-scores", 1000.0);
        let mut portal = FakePortal::with_jobs(vec![posting("A"), posting("B"), posting("C")]);
        let report = stack
            .pipeline()
            .run_batch(&mut portal, &RunOptions::default(), &CancelToken::new())
            .unwrap();

        assert_eq!(report.jobs_seen, 3);
        assert_eq!(report.jobs_scored, 3);
        assert_eq!(report.cache_hits, 0);
        assert_eq!(report.errors, 0);
        assert_eq!(portal.close_calls, 1);
        assert_eq!(stack.db.list_jobs(true).unwrap().len(), 3);
        assert!(stack.db.get_match("A").unwrap().is_some());
        stack.cleanup();
    }

    #[test]
    fn test_batch_twice_is_idempotent_with_cache_hits() {
        let stack = TestStack::new("batch-idempotent", 1000.0);

        let mut portal = FakePortal::with_jobs(vec![posting("A"), posting("B")]);
        let first = stack
            .pipeline()
            .run_batch(&mut portal, &RunOptions::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(first.jobs_scored, 2);

        // Same deterministic enumeration: no duplicate rows, zero recomputes.
        let mut portal = FakePortal::with_jobs(vec![posting("A"), posting("B")]);
        let second = stack
            .pipeline()
            .run_batch(&mut portal, &RunOptions::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(second.jobs_scored, 0);
        assert_eq!(second.cache_hits, 2);
        assert_eq!(stack.db.list_jobs(false).unwrap().len(), 2);

        // Identical results both runs.
        let first_scores: Vec<f64> = first.results.iter().map(|(_, m)| m.fit_score).collect();
        let second_scores: Vec<f64> = second.results.iter().map(|(_, m)| m.fit_score).collect();
        assert_eq!(first_scores, second_scores);
        stack.cleanup();
    }

    #[test]
    fn test_force_rematch_recomputes() {
        let stack = TestStack::new("force-rematch", 1000.0);
        let mut portal = FakePortal::with_jobs(vec![posting("A")]);
        stack
            .pipeline()
            .run_batch(&mut portal, &RunOptions::default(), &CancelToken::new())
            .unwrap();

        let mut portal = FakePortal::with_jobs(vec![posting("A")]);
        let options = RunOptions {
            force_rematch: true,
            ..Default::default()
        };
        let report = stack
            .pipeline()
            .run_batch(&mut portal, &options, &CancelToken::new())
            .unwrap();
        assert_eq!(report.jobs_scored, 1);
        assert_eq!(report.cache_hits, 0);
        stack.cleanup();
    }

    #[test]
    fn test_auth_failure_is_fatal_and_closes_session() {
        let stack = TestStack::new("auth-fatal", 1000.0);
        let mut portal = FakePortal::with_jobs(vec![posting("A")]);
        portal.fail_login = true;

        let err = stack
            .pipeline()
            .run_batch(&mut portal, &RunOptions::default(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert_eq!(portal.close_calls, 1);
        assert!(stack.db.list_jobs(false).unwrap().is_empty());
        stack.cleanup();
    }

    #[test]
    fn test_fetch_failure_is_isolated() {
        let stack = TestStack::new("fetch-isolated", 1000.0);
        let mut portal = FakePortal::with_jobs(vec![posting("A"), posting("B"), posting("C")]);
        portal.fail_fetch.insert("B".to_string());

        let report = stack
            .pipeline()
            .run_batch(&mut portal, &RunOptions::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(report.jobs_seen, 2);
        assert_eq!(report.errors, 1);
        assert!(stack.db.get_job("A").unwrap().is_some());
        assert!(stack.db.get_job("B").unwrap().is_none());
        assert!(stack.db.get_job("C").unwrap().is_some());
        stack.cleanup();
    }

    #[test]
    fn test_stream_autosaves_above_threshold_exactly_once() {
        // Threshold 0: every passing job qualifies (fit >= seniority floor).
        let stack = TestStack::new("stream-autosave", 0.0);
        let mut portal = FakePortal::with_jobs(vec![posting("A"), posting("B")]);

        let report = stack
            .pipeline()
            .run_stream(&mut portal, &RunOptions::default(), &CancelToken::new())
            .unwrap();

        assert_eq!(report.saved_to_folder, 2);
        assert_eq!(portal.save_calls.len(), 2);
        for (job_id, folder) in &portal.save_calls {
            assert_eq!(folder, "shortlist");
            assert!(stack.db.is_in_folder(job_id, folder).unwrap());
        }
        assert_eq!(portal.close_calls, 1);
        stack.cleanup();
    }

    #[test]
    fn test_stream_below_threshold_never_saves() {
        let stack = TestStack::new("stream-no-save", 1000.0); // unreachable threshold
        let mut portal = FakePortal::with_jobs(vec![posting("A"), posting("B")]);

        let report = stack
            .pipeline()
            .run_stream(&mut portal, &RunOptions::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(report.saved_to_folder, 0);
        assert!(portal.save_calls.is_empty());
        // Jobs and matches were still persisted.
        assert_eq!(stack.db.list_jobs(true).unwrap().len(), 2);
        assert!(stack.db.get_match("A").unwrap().is_some());
        stack.cleanup();
    }

    #[test]
    fn test_stream_save_failure_is_isolated() {
        let stack = TestStack::new("save-failure", 0.0);
        let mut portal = FakePortal::with_jobs(vec![posting("A"), posting("B")]);
        portal.fail_save.insert("A".to_string());

        let report = stack
            .pipeline()
            .run_stream(&mut portal, &RunOptions::default(), &CancelToken::new())
            .unwrap();

        // A's save failed but its match is untouched and B still saved.
        assert_eq!(report.errors, 1);
        assert_eq!(report.saved_to_folder, 1);
        assert!(stack.db.get_match("A").unwrap().is_some());
        assert!(!stack.db.is_in_folder("A", "shortlist").unwrap());
        assert!(stack.db.is_in_folder("B", "shortlist").unwrap());
        stack.cleanup();
    }

    #[test]
    fn test_stream_folder_override() {
        let stack = TestStack::new("folder-override", 0.0);
        let mut portal = FakePortal::with_jobs(vec![posting("A")]);
        let options = RunOptions {
            folder: Some("top-picks".to_string()),
            ..Default::default()
        };
        stack
            .pipeline()
            .run_stream(&mut portal, &options, &CancelToken::new())
            .unwrap();
        assert_eq!(portal.save_calls[0].1, "top-picks");
        stack.cleanup();
    }

    #[test]
    fn test_cancellation_leaves_strict_prefix() {
        let stack = TestStack::new("stream-cancel", 1000.0);
        let cancel = CancelToken::new();
        let mut portal = FakePortal::with_jobs(vec![posting("A"), posting("B"), posting("C")]);
        portal.cancel_on_fetch = Some(cancel.clone());

        let err = stack
            .pipeline()
            .run_stream(&mut portal, &RunOptions::default(), &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(err.exit_code(), 130);

        // Exactly the first job was processed end-to-end before the token
        // was honored; the session was still closed once.
        let jobs = stack.db.list_jobs(true).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_id, "A");
        assert!(stack.db.get_match("A").unwrap().is_some());
        assert_eq!(portal.close_calls, 1);
        stack.cleanup();
    }

    #[test]
    fn test_batch_cancellation_commits_checkpoint() {
        let stack = TestStack::new("batch-cancel", 1000.0);
        let cancel = CancelToken::new();
        let mut portal = FakePortal::with_jobs(vec![posting("A"), posting("B"), posting("C")]);
        portal.cancel_on_fetch = Some(cancel.clone());

        let err = stack
            .pipeline()
            .run_batch(&mut portal, &RunOptions::default(), &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        let jobs = stack.db.list_jobs(true).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_id, "A");
        stack.cleanup();
    }

    #[test]
    fn test_analyze_without_portal() {
        let stack = TestStack::new("analyze", 1000.0);
        stack.db.upsert_job(&posting("A")).unwrap();
        stack.db.upsert_job(&posting("B")).unwrap();

        let report = stack
            .pipeline()
            .run_analyze(&RunOptions::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(report.jobs_scored, 2);
        assert_eq!(report.results.len(), 2);
        stack.cleanup();
    }

    #[test]
    fn test_max_jobs_caps_enumeration() {
        let stack = TestStack::new("max-jobs", 1000.0);
        let mut portal = FakePortal::with_jobs(vec![posting("A"), posting("B"), posting("C")]);
        let options = RunOptions {
            max_jobs: Some(2),
            ..Default::default()
        };
        let report = stack
            .pipeline()
            .run_batch(&mut portal, &options, &CancelToken::new())
            .unwrap();
        assert_eq!(report.jobs_seen, 2);
        assert_eq!(stack.db.list_jobs(false).unwrap().len(), 2);
        stack.cleanup();
    }

    #[test]
    fn test_full_enumeration_deactivates_missing_jobs() {
        let stack = TestStack::new("deactivate", 1000.0);
        let mut portal = FakePortal::with_jobs(vec![posting("A"), posting("B")]);
        stack
            .pipeline()
            .run_batch(&mut portal, &RunOptions::default(), &CancelToken::new())
            .unwrap();

        // Next enumeration no longer lists B.
        let mut portal = FakePortal::with_jobs(vec![posting("A")]);
        stack
            .pipeline()
            .run_batch(&mut portal, &RunOptions::default(), &CancelToken::new())
            .unwrap();

        let active: Vec<String> = stack
            .db
            .list_jobs(true)
            .unwrap()
            .into_iter()
            .map(|j| j.job_id)
            .collect();
        assert_eq!(active, vec!["A".to_string()]);
        assert!(!stack.db.get_job("B").unwrap().unwrap().is_active);
        stack.cleanup();
    }

    #[test]
    fn test_scraped_compensation_is_normalized() {
        let stack = TestStack::new("compensation", 1000.0);
        let mut job = posting("A");
        job.compensation_raw = Some("$28 - $34 per hour".to_string());
        let mut portal = FakePortal::with_jobs(vec![job]);

        stack
            .pipeline()
            .run_batch(&mut portal, &RunOptions::default(), &CancelToken::new())
            .unwrap();

        let stored = stack.db.get_job("A").unwrap().unwrap();
        assert_eq!(stored.compensation_value, Some(34.0));
        assert_eq!(stored.compensation_currency.as_deref(), Some("CAD"));
        assert_eq!(stored.compensation_period.as_deref(), Some("hourly"));
        stack.cleanup();
    }
}
