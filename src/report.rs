use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::Utc;

use crate::error::Result;
use crate::models::{Job, MatchResult};

/// Human-readable ranked report, grouped into score bands.
pub fn write_markdown_report(path: &Path, results: &[(Job, MatchResult)]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut out = fs::File::create(path)?;

    writeln!(out, "# Job Match Report\n")?;
    writeln!(out, "Generated: {}\n", Utc::now().to_rfc3339())?;
    writeln!(out, "Total jobs: {}\n", results.len())?;

    let excellent = results.iter().filter(|(_, m)| m.fit_score >= 70.0).count();
    let good = results
        .iter()
        .filter(|(_, m)| (50.0..70.0).contains(&m.fit_score))
        .count();
    let moderate = results
        .iter()
        .filter(|(_, m)| (30.0..50.0).contains(&m.fit_score))
        .count();
    writeln!(out, "## Summary\n")?;
    writeln!(out, "- Excellent matches (70+): {excellent}")?;
    writeln!(out, "- Good matches (50-69): {good}")?;
    writeln!(out, "- Moderate matches (30-49): {moderate}\n")?;
    writeln!(out, "---\n")?;

    for (rank, (job, m)) in results.iter().enumerate() {
        writeln!(
            out,
            "## {}. {} ({:.1}/100)\n",
            rank + 1,
            job.title,
            m.fit_score
        )?;
        writeln!(out, "**Company:** {}  ", job.company)?;
        writeln!(out, "**Location:** {}  ", job.location)?;
        if let Some(deadline) = &job.deadline {
            writeln!(out, "**Deadline:** {deadline}  ")?;
        }
        writeln!(out, "**Job ID:** {}  \n", job.job_id)?;
        writeln!(
            out,
            "Keyword {:.0}% | Coverage {:.0}% | Strength {:.0}% | Seniority {:.0}%\n",
            m.keyword_match * 100.0,
            m.semantic_coverage * 100.0,
            m.semantic_strength * 100.0,
            m.seniority_alignment * 100.0
        )?;
        if !m.matched_technologies.is_empty() {
            writeln!(out, "**Matched tech:** {}\n", m.matched_technologies.join(", "))?;
        }
        if !m.missing_technologies.is_empty() {
            writeln!(out, "**Missing tech:** {}\n", m.missing_technologies.join(", "))?;
        }
        let covered: Vec<_> = m.evidence.iter().filter(|e| e.covered).collect();
        if !covered.is_empty() {
            writeln!(out, "**Covered requirements:**\n")?;
            for evidence in covered.iter().take(5) {
                writeln!(out, "- [{:.2}] {}", evidence.similarity, evidence.requirement)?;
            }
            writeln!(out)?;
        }
        writeln!(out, "---\n")?;
    }
    Ok(())
}

/// Machine-readable export of the same view.
pub fn write_json_export(path: &Path, results: &[(Job, MatchResult)]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    #[derive(serde::Serialize)]
    struct Entry<'a> {
        job: &'a Job,
        #[serde(rename = "match")]
        match_result: &'a MatchResult,
    }
    let entries: Vec<Entry> = results
        .iter()
        .map(|(job, match_result)| Entry { job, match_result })
        .collect();
    fs::write(path, serde_json::to_string_pretty(&entries)?)?;
    Ok(())
}

/// Console summary of the top matches, batch and stream both end with this.
pub fn print_summary(results: &[(Job, MatchResult)]) {
    if results.is_empty() {
        println!("No matches after filtering.");
        return;
    }
    println!(
        "{:<5} {:<10} {:<34} {:<22} {:>7}",
        "RANK", "JOB ID", "TITLE", "COMPANY", "SCORE"
    );
    println!("{}", "-".repeat(82));
    for (rank, (job, m)) in results.iter().take(10).enumerate() {
        println!(
            "{:<5} {:<10} {:<34} {:<22} {:>7.1}",
            rank + 1,
            job.job_id,
            truncate(&job.title, 32),
            truncate(&job.company, 20),
            m.fit_score
        );
    }
    if results.len() > 10 {
        println!("... and {} more", results.len() - 10);
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
