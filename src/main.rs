mod ai;
mod cache;
mod config;
mod db;
mod embedding;
mod error;
mod extractor;
mod filter;
mod lexicon;
mod matcher;
mod models;
mod pipeline;
mod portal;
mod report;
mod resume;

use std::env;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::ai::LlmProvider;
use crate::config::AppConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::extractor::SkipPhrases;
use crate::filter::FilterEngine;
use crate::lexicon::TechLexicon;
use crate::matcher::Matcher;
use crate::models::Job;
use crate::pipeline::{CancelToken, Pipeline, RunOptions, RunReport};
use crate::portal::{ApplyOptions, ChromePortal, DocumentKind, PortalSession};
use crate::report::truncate;
use crate::resume::ResumeIndex;

#[derive(Parser)]
#[command(name = "coopscout")]
#[command(about = "Co-op portal job scout - scrape postings, rank them against your resume, drive applications")]
struct Cli {
    /// Config file (defaults to ./config.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run the browser with a visible window
    #[arg(long, global = true)]
    headed: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full pipeline: scrape everything, then score, filter, and export
    Batch {
        /// Recalculate all scores, ignoring cached matches
        #[arg(long)]
        force_rematch: bool,

        /// Save qualifying jobs to the portal folder after scoring
        #[arg(long)]
        auto_save: bool,

        /// Portal folder for autosave
        #[arg(long)]
        folder: Option<String>,

        /// Minimum fit score override
        #[arg(long)]
        min_score: Option<f64>,

        /// Stop after this many postings
        #[arg(long)]
        max: Option<usize>,
    },

    /// Streaming pipeline: score and act on each posting as it is scraped
    Stream {
        /// Portal folder for autosave
        #[arg(long)]
        folder: Option<String>,

        /// Minimum fit score override
        #[arg(long)]
        min_score: Option<f64>,

        /// Stop after this many postings
        #[arg(long)]
        max: Option<usize>,
    },

    /// Re-score persisted jobs without touching the portal
    Analyze {
        /// Recalculate all scores, ignoring cached matches
        #[arg(long)]
        force_rematch: bool,

        /// Minimum fit score override
        #[arg(long)]
        min_score: Option<f64>,

        /// Stop after this many jobs
        #[arg(long)]
        max: Option<usize>,
    },

    /// Generate cover letters for shortlisted jobs (requires an LLM provider)
    CoverLetter {
        /// Single job to generate for; default is every ranked match
        #[arg(long)]
        job_id: Option<String>,
    },

    /// Upload the latest cover letter and submit an application
    Apply {
        /// Job to apply to
        #[arg(long)]
        job_id: String,

        /// Skip the job if the apply flow has pre-screening questions
        #[arg(long)]
        skip_prescreen: bool,
    },

    /// Show row counts per table
    DbStats,

    /// Export ranked matches as a markdown report
    DbExport {
        /// Output path (defaults to data dir with a timestamp)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Keep only the top N matches
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Invalidate all cached match results and the resume index
    ClearCache,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let cancel = CancelToken::new();
    {
        let handler_token = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
            warn!("could not install Ctrl-C handler: {e}");
        }
    }

    if let Err(err) = run(cli, &cancel) {
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }
}

fn run(cli: Cli, cancel: &CancelToken) -> Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Batch {
            force_rematch,
            auto_save,
            folder,
            min_score,
            max,
        } => {
            apply_overrides(&mut config, min_score, &folder);
            let options = RunOptions {
                force_rematch,
                auto_save,
                max_jobs: max,
                folder,
            };
            let engine = Engine::build(&config)?;
            let llm = ai::create_provider(&config.matcher)?;
            let mut portal = open_portal(&config, !cli.headed)?;
            let pipeline = Pipeline::new(
                &engine.db,
                &engine.matcher,
                &engine.filter,
                &config,
                llm.as_deref(),
            );
            let report = pipeline.run_batch(portal.as_mut(), &options, cancel)?;
            print_run_report("batch", &report);
            Ok(())
        }

        Commands::Stream {
            folder,
            min_score,
            max,
        } => {
            apply_overrides(&mut config, min_score, &folder);
            let options = RunOptions {
                max_jobs: max,
                folder,
                ..Default::default()
            };
            let engine = Engine::build(&config)?;
            let llm = ai::create_provider(&config.matcher)?;
            let mut portal = open_portal(&config, !cli.headed)?;
            let pipeline = Pipeline::new(
                &engine.db,
                &engine.matcher,
                &engine.filter,
                &config,
                llm.as_deref(),
            );
            let report = pipeline.run_stream(portal.as_mut(), &options, cancel)?;
            print_run_report("stream", &report);
            Ok(())
        }

        Commands::Analyze {
            force_rematch,
            min_score,
            max,
        } => {
            apply_overrides(&mut config, min_score, &None);
            let options = RunOptions {
                force_rematch,
                max_jobs: max,
                ..Default::default()
            };
            let engine = Engine::build(&config)?;
            let pipeline = Pipeline::new(&engine.db, &engine.matcher, &engine.filter, &config, None);
            let report = pipeline.run_analyze(&options, cancel)?;
            print_run_report("analyze", &report);
            Ok(())
        }

        Commands::CoverLetter { job_id } => cmd_cover_letter(&config, job_id.as_deref(), cancel),

        Commands::Apply {
            job_id,
            skip_prescreen,
        } => cmd_apply(&config, &job_id, skip_prescreen, !cli.headed),

        Commands::DbStats => cmd_db_stats(&config),

        Commands::DbExport { output, limit } => cmd_db_export(&config, output, limit),

        Commands::ClearCache => cmd_clear_cache(&config),
    }
}

fn apply_overrides(config: &mut AppConfig, min_score: Option<f64>, folder: &Option<String>) {
    if let Some(min_score) = min_score {
        config.matcher.min_match_score = min_score;
    }
    if let Some(folder) = folder {
        config.portal_folder = folder.clone();
    }
}

/// The scoring stack: store plus matcher plus filter, built once per command.
struct Engine {
    db: Database,
    matcher: Matcher,
    filter: FilterEngine,
}

impl Engine {
    fn build(config: &AppConfig) -> Result<Self> {
        let lexicon = match &config.tech_lexicon_path {
            Some(path) => TechLexicon::from_file(path)?,
            None => TechLexicon::with_default_terms()?,
        };
        let skip = match &config.noise_skip_phrases_path {
            Some(path) => SkipPhrases::from_file(path)?,
            None => SkipPhrases::with_defaults(),
        };
        let provider = embedding::create_provider(&config.matcher.embedding_model_id)?;
        let index =
            ResumeIndex::open_or_build(&config.resume_path, provider.as_ref(), &config.resume_index_dir())?;
        println!("Resume index ready: {} bullets", index.len());

        let matcher = Matcher::new(provider, index, lexicon, skip, config.matcher.clone());
        let filter = FilterEngine::new(config);
        let db = Database::open(&config.database_path())?;
        db.set_meta("engine_version", matcher.version())?;
        Ok(Self {
            db,
            matcher,
            filter,
        })
    }
}

fn open_portal(config: &AppConfig, headless: bool) -> Result<Box<dyn PortalSession>> {
    let username = env::var("COOPSCOUT_PORTAL_USERNAME").map_err(|_| {
        Error::Config("COOPSCOUT_PORTAL_USERNAME is not set (portal credentials)".to_string())
    })?;
    let password = env::var("COOPSCOUT_PORTAL_PASSWORD").map_err(|_| {
        Error::Config("COOPSCOUT_PORTAL_PASSWORD is not set (portal credentials)".to_string())
    })?;
    Ok(Box::new(ChromePortal::new(
        &config.portal_base_url,
        &username,
        &password,
        headless,
    )))
}

fn print_run_report(mode: &str, report: &RunReport) {
    println!();
    println!(
        "{mode} complete: {} seen, {} scored, {} cache hits, {} errors, {} saved to folder",
        report.jobs_seen,
        report.jobs_scored,
        report.cache_hits,
        report.errors,
        report.saved_to_folder
    );
    println!();
    report::print_summary(&report.results);
}

fn cmd_cover_letter(config: &AppConfig, job_id: Option<&str>, cancel: &CancelToken) -> Result<()> {
    let provider = ai::create_provider(&config.matcher)?.ok_or_else(|| {
        Error::Config("cover letter generation needs matcher.llm_provider set".to_string())
    })?;
    let engine = Engine::build(config)?;

    let targets: Vec<Job> = match job_id {
        Some(id) => {
            let job = engine
                .db
                .get_job(id)?
                .ok_or_else(|| Error::Config(format!("job {id} is not in the store")))?;
            vec![job]
        }
        None => engine
            .db
            .ranked_matches(None)?
            .into_iter()
            .map(|(job, _)| job)
            .collect(),
    };
    if targets.is_empty() {
        println!("No ranked jobs to generate cover letters for. Run batch or analyze first.");
        return Ok(());
    }

    let out_dir = config.data_dir.join("cover_letters");
    let mut generated = 0;
    let mut skipped = 0;
    let mut failed = 0;

    for job in &targets {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if engine.db.latest_cover_letter(&job.job_id)?.is_some() {
            skipped += 1;
            continue;
        }

        // Ground the letter in the resume lines the matcher actually used.
        let highlights: Vec<String> = match engine.db.get_match(&job.job_id)? {
            Some(m) => m
                .evidence
                .iter()
                .filter(|e| e.covered)
                .filter_map(|e| e.bullet_index)
                .filter_map(|i| engine.matcher.index().bullet(i))
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        };

        match ai::generate_cover_letter(provider.as_ref(), job, &highlights) {
            Ok(body) => {
                let path = ai::render_cover_letter(
                    config.cover_letter_template.as_deref(),
                    job,
                    &body,
                    &out_dir,
                )?;
                engine.db.record_cover_letter(
                    &job.job_id,
                    &body,
                    Some(&path.to_string_lossy()),
                    provider.name(),
                )?;
                println!("Generated cover letter for {} ({})", job.job_id, truncate(&job.title, 40));
                generated += 1;
            }
            Err(e) => {
                warn!(job_id = %job.job_id, stage = "cover-letter", "{e}");
                failed += 1;
            }
        }
    }

    println!();
    println!("Cover letters: {generated} generated, {skipped} already existed, {failed} failed");
    Ok(())
}

fn cmd_apply(config: &AppConfig, job_id: &str, skip_prescreen: bool, headless: bool) -> Result<()> {
    let db = Database::open(&config.database_path())?;
    let job = db
        .get_job(job_id)?
        .ok_or_else(|| Error::Config(format!("job {job_id} is not in the store")))?;
    let letter = db.latest_cover_letter(job_id)?;

    let mut portal = open_portal(config, headless)?;
    let outcome: Result<crate::models::ApplyOutcome> = (|| {
        portal.login()?;

        let mut documents = Vec::new();
        if let Some(letter) = &letter {
            if let Some(path) = &letter.file_path {
                portal.upload_document(job_id, std::path::Path::new(path), DocumentKind::CoverLetter)?;
                db.mark_uploaded(letter.letter_id)?;
                documents.push(format!("cover-letter:{}", letter.letter_id));
            }
        }

        let options = ApplyOptions {
            skip_prescreen,
            cover_letter_path: None,
        };
        let outcome = portal.apply(job_id, &options)?;
        db.record_application(
            job_id,
            outcome.status(),
            letter.as_ref().map(|l| l.letter_id),
            &documents,
        )?;
        Ok(outcome)
    })();
    portal.close();

    let outcome = outcome?;
    println!(
        "Application for {} at {}: {}",
        job.title,
        job.company,
        outcome.status().as_str()
    );
    Ok(())
}

fn cmd_db_stats(config: &AppConfig) -> Result<()> {
    let db = Database::open(&config.database_path())?;
    println!("Database: {}", db.path().display());
    println!();
    println!("{:<20} {:>8}", "TABLE", "ROWS");
    println!("{}", "-".repeat(29));
    for (table, count) in db.stats()? {
        println!("{:<20} {:>8}", table, count);
    }

    let top = db.ranked_matches(Some(5))?;
    if !top.is_empty() {
        println!();
        println!("Top matches:");
        for (rank, (job, m)) in top.iter().enumerate() {
            println!(
                "  {}. [{:>5.1}] {} @ {}",
                rank + 1,
                m.fit_score,
                truncate(&job.title, 40),
                truncate(&job.company, 24)
            );
        }
    }
    Ok(())
}

fn cmd_db_export(config: &AppConfig, output: Option<PathBuf>, limit: Option<usize>) -> Result<()> {
    let db = Database::open(&config.database_path())?;
    let results = db.ranked_matches(limit)?;
    if results.is_empty() {
        println!("No matches in the store. Run batch or analyze first.");
        return Ok(());
    }
    let path = output.unwrap_or_else(|| {
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        config.data_dir.join(format!("database_export_{stamp}.md"))
    });
    report::write_markdown_report(&path, &results)?;
    println!("Exported {} matches to {}", results.len(), path.display());
    Ok(())
}

fn cmd_clear_cache(config: &AppConfig) -> Result<()> {
    let db = Database::open(&config.database_path())?;
    let removed = db.delete_matches()?;
    let meta = db.clear_meta()?;

    let index_dir = config.resume_index_dir();
    let index_removed = index_dir.exists();
    if index_removed {
        std::fs::remove_dir_all(&index_dir)?;
    }

    println!("Cleared {removed} cached match results and {meta} metadata entries.");
    if index_removed {
        println!("Removed resume index at {}; it will rebuild on next run.", index_dir.display());
    }
    Ok(())
}
