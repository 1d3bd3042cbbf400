use crate::db::Database;
use crate::error::Result;
use crate::models::MatchResult;

/// Versioned memo of match results keyed by job id, backed by the store.
/// A stored result only counts as a hit when its `analysis_version` matches
/// the engine that would recompute it; anything else is a miss.
pub struct MatchCache<'a> {
    db: &'a Database,
    version: String,
    hits: u64,
    misses: u64,
}

impl<'a> MatchCache<'a> {
    pub fn new(db: &'a Database, version: String) -> Self {
        Self {
            db,
            version,
            hits: 0,
            misses: 0,
        }
    }

    pub fn lookup(&mut self, job_id: &str) -> Result<Option<MatchResult>> {
        match self.db.get_match(job_id)? {
            Some(cached) if cached.analysis_version == self.version => {
                self.hits += 1;
                Ok(Some(cached))
            }
            _ => {
                self.misses += 1;
                Ok(None)
            }
        }
    }

    /// Upsert a freshly computed result. Atomic per job; the last writer
    /// wins.
    pub fn store(&mut self, result: &MatchResult) -> Result<()> {
        self.db.upsert_match(result)
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}
