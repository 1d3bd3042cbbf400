use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};

use crate::error::Result;
use crate::models::{Application, ApplicationStatus, CoverLetter, Evidence, Job, MatchResult};

/// Single-file relational store for jobs, matches, cover letters,
/// applications, and folder memberships. One connection per process;
/// multi-row writes run inside a transaction.
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

/// Counters recorded per pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RunRecord {
    pub mode: String,
    pub started_at: String,
    pub finished_at: String,
    pub jobs_seen: i64,
    pub jobs_scored: i64,
    pub cache_hits: i64,
    pub errors: i64,
}

impl Database {
    /// Open (creating parent directories as needed) and run the idempotent
    /// schema migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self {
            conn,
            path: path.to_path_buf(),
        };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory store, primarily for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                company TEXT NOT NULL,
                division TEXT,
                location TEXT NOT NULL DEFAULT '',
                level TEXT,
                openings INTEGER NOT NULL DEFAULT 0,
                applications INTEGER NOT NULL DEFAULT 0,
                deadline TEXT,
                summary TEXT NOT NULL DEFAULT '',
                responsibilities TEXT NOT NULL DEFAULT '',
                skills TEXT NOT NULL DEFAULT '',
                additional_info TEXT NOT NULL DEFAULT '',
                employment_location_arrangement TEXT NOT NULL DEFAULT '',
                work_term_duration TEXT NOT NULL DEFAULT '',
                compensation_raw TEXT,
                compensation_value REAL,
                compensation_currency TEXT,
                compensation_period TEXT,
                application_documents_required TEXT NOT NULL DEFAULT '[]',
                targeted_degrees_disciplines TEXT NOT NULL DEFAULT '[]',
                is_active INTEGER NOT NULL DEFAULT 1,
                scraped_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS job_matches (
                job_id TEXT PRIMARY KEY REFERENCES jobs(job_id) ON DELETE CASCADE,
                fit_score REAL NOT NULL,
                keyword_match REAL NOT NULL,
                semantic_coverage REAL NOT NULL,
                semantic_strength REAL NOT NULL,
                seniority_alignment REAL NOT NULL,
                matched_technologies TEXT NOT NULL DEFAULT '[]',
                missing_technologies TEXT NOT NULL DEFAULT '[]',
                evidence TEXT NOT NULL DEFAULT '[]',
                analysis_version TEXT NOT NULL,
                analyzed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS analysis_runs (
                run_id INTEGER PRIMARY KEY AUTOINCREMENT,
                mode TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                jobs_seen INTEGER NOT NULL DEFAULT 0,
                jobs_scored INTEGER NOT NULL DEFAULT 0,
                cache_hits INTEGER NOT NULL DEFAULT 0,
                errors INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS cover_letters (
                letter_id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                file_path TEXT,
                provider TEXT NOT NULL,
                word_count INTEGER NOT NULL,
                generated_at TEXT NOT NULL,
                is_uploaded INTEGER NOT NULL DEFAULT 0,
                uploaded_at TEXT
            );

            CREATE TABLE IF NOT EXISTS applications (
                application_id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
                status TEXT NOT NULL CHECK (status IN (
                    'draft', 'submitted', 'skipped-external',
                    'skipped-extra-docs', 'skipped-prescreen', 'failed')),
                letter_id INTEGER REFERENCES cover_letters(letter_id) ON DELETE SET NULL,
                documents TEXT NOT NULL DEFAULT '[]',
                submitted_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS saved_folders (
                job_id TEXT NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
                folder_name TEXT NOT NULL,
                saved_at TEXT NOT NULL,
                PRIMARY KEY (job_id, folder_name)
            );

            CREATE TABLE IF NOT EXISTS cache_metadata (
                cache_key TEXT PRIMARY KEY,
                cache_value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_active ON jobs(is_active);
            CREATE INDEX IF NOT EXISTS idx_matches_score ON job_matches(fit_score);
            CREATE INDEX IF NOT EXISTS idx_letters_job ON cover_letters(job_id);
            CREATE INDEX IF NOT EXISTS idx_applications_job ON applications(job_id);
            "#,
        )?;
        Ok(())
    }

    // --- Job operations ---

    /// Insert or update by job_id. `scraped_at` is set on insert only;
    /// `updated_at` on every write.
    pub fn upsert_job(&self, job: &Job) -> Result<()> {
        self.upsert_job_at(job, &Utc::now().to_rfc3339())
    }

    fn upsert_job_at(&self, job: &Job, now: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO jobs (
                job_id, title, company, division, location, level,
                openings, applications, deadline,
                summary, responsibilities, skills, additional_info,
                employment_location_arrangement, work_term_duration,
                compensation_raw, compensation_value, compensation_currency, compensation_period,
                application_documents_required, targeted_degrees_disciplines,
                is_active, scraped_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                      ?16, ?17, ?18, ?19, ?20, ?21, 1, ?22, ?22)
            ON CONFLICT(job_id) DO UPDATE SET
                title = excluded.title,
                company = excluded.company,
                division = excluded.division,
                location = excluded.location,
                level = excluded.level,
                openings = excluded.openings,
                applications = excluded.applications,
                deadline = excluded.deadline,
                summary = excluded.summary,
                responsibilities = excluded.responsibilities,
                skills = excluded.skills,
                additional_info = excluded.additional_info,
                employment_location_arrangement = excluded.employment_location_arrangement,
                work_term_duration = excluded.work_term_duration,
                compensation_raw = excluded.compensation_raw,
                compensation_value = excluded.compensation_value,
                compensation_currency = excluded.compensation_currency,
                compensation_period = excluded.compensation_period,
                application_documents_required = excluded.application_documents_required,
                targeted_degrees_disciplines = excluded.targeted_degrees_disciplines,
                is_active = 1,
                updated_at = excluded.updated_at
            "#,
            params![
                job.job_id,
                job.title,
                job.company,
                job.division,
                job.location,
                job.level,
                job.openings,
                job.applications,
                job.deadline,
                job.summary,
                job.responsibilities,
                job.skills,
                job.additional_info,
                job.employment_location_arrangement,
                job.work_term_duration,
                job.compensation_raw,
                job.compensation_value,
                job.compensation_currency,
                job.compensation_period,
                serde_json::to_string(&job.application_documents_required)?,
                serde_json::to_string(&job.targeted_degrees_disciplines)?,
                now,
            ],
        )?;
        Ok(())
    }

    /// Upsert a batch inside one transaction (the scrape checkpoint unit).
    pub fn upsert_jobs(&self, jobs: &[Job]) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }
        let tx = self.conn.unchecked_transaction()?;
        let now = Utc::now().to_rfc3339();
        for job in jobs {
            self.upsert_job_at(job, &now)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let result = self.conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
            [job_id],
            row_to_job,
        );
        match result {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_jobs(&self, active_only: bool) -> Result<Vec<Job>> {
        let sql = if active_only {
            format!("SELECT {JOB_COLUMNS} FROM jobs WHERE is_active = 1 ORDER BY job_id")
        } else {
            format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY job_id")
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_job)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn delete_job(&self, job_id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM jobs WHERE job_id = ?1", [job_id])?;
        Ok(changed > 0)
    }

    /// Mark jobs outside `seen` inactive; everything in `seen` active. Runs
    /// after a full portal enumeration.
    pub fn mark_active_set(&self, seen: &[String]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let now = Utc::now().to_rfc3339();
        let seen_set: HashSet<&str> = seen.iter().map(String::as_str).collect();
        let ids: Vec<String> = {
            let mut stmt = self.conn.prepare("SELECT job_id FROM jobs WHERE is_active = 1")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        let mut deactivated = 0;
        for id in ids {
            if !seen_set.contains(id.as_str()) {
                self.conn.execute(
                    "UPDATE jobs SET is_active = 0, updated_at = ?1 WHERE job_id = ?2",
                    params![now, id],
                )?;
                deactivated += 1;
            }
        }
        tx.commit()?;
        Ok(deactivated)
    }

    // --- Match operations ---

    pub fn upsert_match(&self, result: &MatchResult) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO job_matches (
                job_id, fit_score, keyword_match, semantic_coverage,
                semantic_strength, seniority_alignment,
                matched_technologies, missing_technologies, evidence,
                analysis_version, analyzed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(job_id) DO UPDATE SET
                fit_score = excluded.fit_score,
                keyword_match = excluded.keyword_match,
                semantic_coverage = excluded.semantic_coverage,
                semantic_strength = excluded.semantic_strength,
                seniority_alignment = excluded.seniority_alignment,
                matched_technologies = excluded.matched_technologies,
                missing_technologies = excluded.missing_technologies,
                evidence = excluded.evidence,
                analysis_version = excluded.analysis_version,
                analyzed_at = excluded.analyzed_at
            "#,
            params![
                result.job_id,
                result.fit_score,
                result.keyword_match,
                result.semantic_coverage,
                result.semantic_strength,
                result.seniority_alignment,
                serde_json::to_string(&result.matched_technologies)?,
                serde_json::to_string(&result.missing_technologies)?,
                serde_json::to_string(&result.evidence)?,
                result.analysis_version,
                result.analyzed_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_match(&self, job_id: &str) -> Result<Option<MatchResult>> {
        let result = self.conn.query_row(
            &format!("SELECT {MATCH_COLUMNS} FROM job_matches WHERE job_id = ?1"),
            [job_id],
            row_to_match,
        );
        match result {
            Ok(m) => Ok(Some(m)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop all cached match results; they will be recomputed on next use.
    pub fn delete_matches(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM job_matches", [])?)
    }

    /// Active jobs joined with their matches, ranked by fit score
    /// descending, ties by job id ascending.
    pub fn ranked_matches(&self, limit: Option<usize>) -> Result<Vec<(Job, MatchResult)>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS}, {MATCH_COLUMNS_QUALIFIED}
             FROM jobs INNER JOIN job_matches m ON jobs.job_id = m.job_id
             WHERE jobs.is_active = 1
             ORDER BY m.fit_score DESC, jobs.job_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let job = row_to_job(row)?;
            let m = row_to_match_offset(row, JOB_COLUMN_COUNT)?;
            Ok((job, m))
        })?;
        let mut out = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    // --- Cover letters ---

    pub fn record_cover_letter(
        &self,
        job_id: &str,
        content: &str,
        file_path: Option<&str>,
        provider: &str,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            r#"
            INSERT INTO cover_letters (job_id, content, file_path, provider, word_count, generated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                job_id,
                content,
                file_path,
                provider,
                content.split_whitespace().count() as i64,
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent cover letter for a job, if any.
    pub fn latest_cover_letter(&self, job_id: &str) -> Result<Option<CoverLetter>> {
        let result = self.conn.query_row(
            "SELECT letter_id, job_id, content, file_path, provider, word_count,
                    generated_at, is_uploaded, uploaded_at
             FROM cover_letters WHERE job_id = ?1
             ORDER BY generated_at DESC, letter_id DESC LIMIT 1",
            [job_id],
            row_to_cover_letter,
        );
        match result {
            Ok(letter) => Ok(Some(letter)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn mark_uploaded(&self, letter_id: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE cover_letters SET is_uploaded = 1, uploaded_at = ?1 WHERE letter_id = ?2",
            params![now, letter_id],
        )?;
        Ok(())
    }

    // --- Applications ---

    pub fn record_application(
        &self,
        job_id: &str,
        status: ApplicationStatus,
        letter_id: Option<i64>,
        documents: &[String],
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO applications (job_id, status, letter_id, documents, submitted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                job_id,
                status.as_str(),
                letter_id,
                serde_json::to_string(documents)?,
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_applications(&self, job_id: &str) -> Result<Vec<Application>> {
        let mut stmt = self.conn.prepare(
            "SELECT application_id, job_id, status, letter_id, documents, submitted_at
             FROM applications WHERE job_id = ?1 ORDER BY application_id",
        )?;
        let rows = stmt.query_map([job_id], row_to_application)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    // --- Folder memberships ---

    pub fn save_folder_membership(&self, job_id: &str, folder: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT OR IGNORE INTO saved_folders (job_id, folder_name, saved_at)
             VALUES (?1, ?2, ?3)",
            params![job_id, folder, now],
        )?;
        Ok(())
    }

    pub fn is_in_folder(&self, job_id: &str, folder: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM saved_folders WHERE job_id = ?1 AND folder_name = ?2",
            params![job_id, folder],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn list_folder(&self, folder: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT job_id FROM saved_folders WHERE folder_name = ?1 ORDER BY job_id",
        )?;
        let rows = stmt.query_map([folder], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    // --- Runs & metadata ---

    pub fn record_run(&self, record: &RunRecord) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO analysis_runs (mode, started_at, finished_at, jobs_seen, jobs_scored, cache_hits, errors)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.mode,
                record.started_at,
                record.finished_at,
                record.jobs_seen,
                record.jobs_scored,
                record.cache_hits,
                record.errors
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO cache_metadata (cache_key, cache_value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(cache_key) DO UPDATE SET cache_value = excluded.cache_value,
                                                  updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT cache_value FROM cache_metadata WHERE cache_key = ?1",
            [key],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn clear_meta(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM cache_metadata", [])?)
    }

    /// Row counts per table.
    pub fn stats(&self) -> Result<Vec<(&'static str, i64)>> {
        const TABLES: &[&str] = &[
            "jobs",
            "job_matches",
            "analysis_runs",
            "cover_letters",
            "applications",
            "saved_folders",
            "cache_metadata",
        ];
        let mut stats = Vec::with_capacity(TABLES.len());
        for table in TABLES {
            let count: i64 =
                self.conn
                    .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                        row.get(0)
                    })?;
            stats.push((*table, count));
        }
        Ok(stats)
    }
}

const JOB_COLUMN_COUNT: usize = 24;

const JOB_COLUMNS: &str = "jobs.job_id, jobs.title, jobs.company, jobs.division, jobs.location, jobs.level, \
     jobs.openings, jobs.applications, jobs.deadline, jobs.summary, jobs.responsibilities, \
     jobs.skills, jobs.additional_info, jobs.employment_location_arrangement, \
     jobs.work_term_duration, jobs.compensation_raw, jobs.compensation_value, \
     jobs.compensation_currency, jobs.compensation_period, \
     jobs.application_documents_required, jobs.targeted_degrees_disciplines, \
     jobs.is_active, jobs.scraped_at, jobs.updated_at";

const MATCH_COLUMNS: &str = "job_id, fit_score, keyword_match, semantic_coverage, semantic_strength, \
     seniority_alignment, matched_technologies, missing_technologies, evidence, \
     analysis_version, analyzed_at";

const MATCH_COLUMNS_QUALIFIED: &str = "m.job_id, m.fit_score, m.keyword_match, m.semantic_coverage, m.semantic_strength, \
     m.seniority_alignment, m.matched_technologies, m.missing_technologies, m.evidence, \
     m.analysis_version, m.analyzed_at";

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, index: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e))
    })
}

fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
    Ok(Job {
        job_id: row.get(0)?,
        title: row.get(1)?,
        company: row.get(2)?,
        division: row.get(3)?,
        location: row.get(4)?,
        level: row.get(5)?,
        openings: row.get(6)?,
        applications: row.get(7)?,
        deadline: row.get(8)?,
        summary: row.get(9)?,
        responsibilities: row.get(10)?,
        skills: row.get(11)?,
        additional_info: row.get(12)?,
        employment_location_arrangement: row.get(13)?,
        work_term_duration: row.get(14)?,
        compensation_raw: row.get(15)?,
        compensation_value: row.get(16)?,
        compensation_currency: row.get(17)?,
        compensation_period: row.get(18)?,
        application_documents_required: json_column(row, 19)?,
        targeted_degrees_disciplines: json_column(row, 20)?,
        is_active: row.get::<_, i64>(21)? != 0,
        scraped_at: row.get(22)?,
        updated_at: row.get(23)?,
    })
}

fn row_to_match(row: &Row) -> rusqlite::Result<MatchResult> {
    row_to_match_offset(row, 0)
}

fn row_to_match_offset(row: &Row, offset: usize) -> rusqlite::Result<MatchResult> {
    let evidence: Vec<Evidence> = json_column(row, offset + 8)?;
    Ok(MatchResult {
        job_id: row.get(offset)?,
        fit_score: row.get(offset + 1)?,
        keyword_match: row.get(offset + 2)?,
        semantic_coverage: row.get(offset + 3)?,
        semantic_strength: row.get(offset + 4)?,
        seniority_alignment: row.get(offset + 5)?,
        matched_technologies: json_column(row, offset + 6)?,
        missing_technologies: json_column(row, offset + 7)?,
        evidence,
        analysis_version: row.get(offset + 9)?,
        analyzed_at: row.get(offset + 10)?,
    })
}

fn row_to_cover_letter(row: &Row) -> rusqlite::Result<CoverLetter> {
    Ok(CoverLetter {
        letter_id: row.get(0)?,
        job_id: row.get(1)?,
        content: row.get(2)?,
        file_path: row.get(3)?,
        provider: row.get(4)?,
        word_count: row.get(5)?,
        generated_at: row.get(6)?,
        is_uploaded: row.get::<_, i64>(7)? != 0,
        uploaded_at: row.get(8)?,
    })
}

fn row_to_application(row: &Row) -> rusqlite::Result<Application> {
    let status_raw: String = row.get(2)?;
    let status = ApplicationStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown application status '{status_raw}'").into(),
        )
    })?;
    Ok(Application {
        application_id: row.get(0)?,
        job_id: row.get(1)?,
        status,
        letter_id: row.get(3)?,
        documents: json_column(row, 4)?,
        submitted_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job(id: &str) -> Job {
        Job {
            job_id: id.into(),
            title: "Backend Developer - Co-op".into(),
            company: "Maple Systems".into(),
            division: Some("Platform".into()),
            location: "Toronto, ON".into(),
            level: Some("Junior".into()),
            openings: 2,
            applications: 41,
            deadline: Some("2026-09-30T23:59:00+00:00".into()),
            summary: "Build internal services.".into(),
            responsibilities: "Develop REST APIs in Python.".into(),
            skills: "Python, PostgreSQL, Docker".into(),
            additional_info: "Cover letter required.".into(),
            employment_location_arrangement: "Hybrid".into(),
            work_term_duration: "4 months".into(),
            compensation_raw: Some("$28-$34/hour".into()),
            compensation_value: Some(34.0),
            compensation_currency: Some("CAD".into()),
            compensation_period: Some("hourly".into()),
            application_documents_required: vec!["Resume".into(), "Cover Letter".into()],
            targeted_degrees_disciplines: vec!["Computer Science".into()],
            is_active: true,
            scraped_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn sample_match(id: &str, fit: f64, version: &str) -> MatchResult {
        MatchResult {
            job_id: id.into(),
            fit_score: fit,
            keyword_match: 0.66,
            semantic_coverage: 0.5,
            semantic_strength: 0.42,
            seniority_alignment: 0.8,
            matched_technologies: vec!["docker".into(), "python".into()],
            missing_technologies: vec!["kubernetes".into()],
            evidence: vec![Evidence {
                requirement: "Develop REST APIs in Python.".into(),
                bullet_index: Some(0),
                similarity: 0.61,
                covered: true,
            }],
            analysis_version: version.into(),
            analyzed_at: "2026-08-01T12:00:00+00:00".into(),
        }
    }

    #[test]
    fn test_job_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let job = sample_job("J100");
        db.upsert_job(&job).unwrap();

        let stored = db.get_job("J100").unwrap().unwrap();
        assert!(!stored.scraped_at.is_empty());
        assert!(!stored.updated_at.is_empty());

        // Everything except store-managed timestamps round-trips.
        let mut expected = job.clone();
        expected.scraped_at = stored.scraped_at.clone();
        expected.updated_at = stored.updated_at.clone();
        assert_eq!(stored, expected);
    }

    #[test]
    fn test_upsert_preserves_scraped_at() {
        let db = Database::open_in_memory().unwrap();
        let mut job = sample_job("J100");
        db.upsert_job(&job).unwrap();
        let first = db.get_job("J100").unwrap().unwrap();

        job.title = "Backend Developer II - Co-op".into();
        db.upsert_job(&job).unwrap();
        let second = db.get_job("J100").unwrap().unwrap();

        assert_eq!(second.scraped_at, first.scraped_at);
        assert_eq!(second.title, "Backend Developer II - Co-op");
    }

    #[test]
    fn test_upsert_is_idempotent_row_count() {
        let db = Database::open_in_memory().unwrap();
        let job = sample_job("J100");
        db.upsert_job(&job).unwrap();
        db.upsert_job(&job).unwrap();
        assert_eq!(db.list_jobs(false).unwrap().len(), 1);
    }

    #[test]
    fn test_match_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_job(&sample_job("J100")).unwrap();
        let m = sample_match("J100", 73.1, "v3-abc");
        db.upsert_match(&m).unwrap();
        assert_eq!(db.get_match("J100").unwrap().unwrap(), m);

        // Re-score overwrites; one current match per job.
        let m2 = sample_match("J100", 55.0, "v3-def");
        db.upsert_match(&m2).unwrap();
        assert_eq!(db.get_match("J100").unwrap().unwrap(), m2);
        assert_eq!(db.stats().unwrap()[1], ("job_matches", 1));
    }

    #[test]
    fn test_match_requires_job() {
        let db = Database::open_in_memory().unwrap();
        let err = db.upsert_match(&sample_match("GHOST", 10.0, "v3"));
        assert!(err.is_err());
    }

    #[test]
    fn test_delete_job_cascades() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_job(&sample_job("J100")).unwrap();
        db.upsert_match(&sample_match("J100", 80.0, "v3")).unwrap();
        let letter_id = db
            .record_cover_letter("J100", "Dear team", None, "anthropic")
            .unwrap();
        db.record_application(
            "J100",
            ApplicationStatus::Submitted,
            Some(letter_id),
            &["doc-1".into()],
        )
        .unwrap();
        db.save_folder_membership("J100", "shortlist").unwrap();

        assert!(db.delete_job("J100").unwrap());
        for (table, count) in db.stats().unwrap() {
            if table != "analysis_runs" && table != "cache_metadata" {
                assert_eq!(count, 0, "{table} not cascaded");
            }
        }
    }

    #[test]
    fn test_mark_active_set() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_job(&sample_job("A")).unwrap();
        db.upsert_job(&sample_job("B")).unwrap();
        db.upsert_job(&sample_job("C")).unwrap();

        let deactivated = db.mark_active_set(&["A".into(), "C".into()]).unwrap();
        assert_eq!(deactivated, 1);
        let active: Vec<String> = db
            .list_jobs(true)
            .unwrap()
            .into_iter()
            .map(|j| j.job_id)
            .collect();
        assert_eq!(active, vec!["A".to_string(), "C".to_string()]);

        // Re-upsert reactivates.
        db.upsert_job(&sample_job("B")).unwrap();
        assert_eq!(db.list_jobs(true).unwrap().len(), 3);
    }

    #[test]
    fn test_ranked_matches_ordering() {
        let db = Database::open_in_memory().unwrap();
        for id in ["A", "B", "C"] {
            db.upsert_job(&sample_job(id)).unwrap();
        }
        db.upsert_match(&sample_match("B", 90.0, "v3")).unwrap();
        db.upsert_match(&sample_match("A", 70.0, "v3")).unwrap();
        db.upsert_match(&sample_match("C", 90.0, "v3")).unwrap();

        let ranked = db.ranked_matches(None).unwrap();
        let ids: Vec<&str> = ranked.iter().map(|(j, _)| j.job_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C", "A"]);

        assert_eq!(db.ranked_matches(Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_cover_letter_flow() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_job(&sample_job("J100")).unwrap();
        assert!(db.latest_cover_letter("J100").unwrap().is_none());

        let first = db
            .record_cover_letter("J100", "one two three", Some("data/cover_J100.md"), "openai")
            .unwrap();
        let second = db
            .record_cover_letter("J100", "newer letter body", None, "anthropic")
            .unwrap();
        assert!(second > first);

        let latest = db.latest_cover_letter("J100").unwrap().unwrap();
        assert_eq!(latest.letter_id, second);
        assert_eq!(latest.word_count, 3);
        assert!(!latest.is_uploaded);

        db.mark_uploaded(second).unwrap();
        let latest = db.latest_cover_letter("J100").unwrap().unwrap();
        assert!(latest.is_uploaded);
        assert!(latest.uploaded_at.is_some());
    }

    #[test]
    fn test_application_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_job(&sample_job("J100")).unwrap();
        db.record_application("J100", ApplicationStatus::SkippedPrescreen, None, &[])
            .unwrap();
        db.record_application(
            "J100",
            ApplicationStatus::Submitted,
            None,
            &["resume".into(), "cover".into()],
        )
        .unwrap();

        let apps = db.list_applications("J100").unwrap();
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].status, ApplicationStatus::SkippedPrescreen);
        assert_eq!(apps[1].documents.len(), 2);
    }

    #[test]
    fn test_folder_membership() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_job(&sample_job("J100")).unwrap();
        db.save_folder_membership("J100", "shortlist").unwrap();
        db.save_folder_membership("J100", "shortlist").unwrap(); // idempotent
        assert!(db.is_in_folder("J100", "shortlist").unwrap());
        assert!(!db.is_in_folder("J100", "other").unwrap());
        assert_eq!(db.list_folder("shortlist").unwrap(), vec!["J100".to_string()]);
    }

    #[test]
    fn test_meta_and_runs() {
        let db = Database::open_in_memory().unwrap();
        db.set_meta("engine_version", "v3-abc").unwrap();
        db.set_meta("engine_version", "v3-def").unwrap();
        assert_eq!(db.get_meta("engine_version").unwrap().unwrap(), "v3-def");
        assert!(db.get_meta("missing").unwrap().is_none());

        db.record_run(&RunRecord {
            mode: "batch".into(),
            started_at: "2026-08-01T00:00:00+00:00".into(),
            finished_at: "2026-08-01T00:05:00+00:00".into(),
            jobs_seen: 12,
            jobs_scored: 4,
            cache_hits: 8,
            errors: 1,
        })
        .unwrap();
        let stats = db.stats().unwrap();
        assert!(stats.contains(&("analysis_runs", 1)));
    }

    #[test]
    fn test_migrations_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db.migrate().unwrap();
        assert!(db.stats().unwrap().iter().all(|(_, c)| *c == 0));
    }
}
