use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// One canonical technology term with its aliases. Matching is always
/// against the canonical form plus every alias; hits report the canonical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermEntry {
    pub canonical: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub category: String,
}

impl TermEntry {
    fn new(canonical: &str, aliases: &[&str], category: &str) -> Self {
        Self {
            canonical: canonical.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            category: category.to_string(),
        }
    }
}

/// Canonicalized technology term set with case-insensitive whole-word
/// matching. The digest over the serialized table feeds the engine version,
/// so editing the lexicon invalidates cached match results.
pub struct TechLexicon {
    entries: Vec<TermEntry>,
    patterns: Vec<(usize, Regex)>,
    digest: String,
}

impl TechLexicon {
    pub fn with_default_terms() -> Result<Self> {
        Self::from_entries(default_entries())
    }

    /// Load from a JSON file holding a list of `TermEntry` objects.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read lexicon {}: {e}", path.display())))?;
        let entries: Vec<TermEntry> = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid lexicon {}: {e}", path.display())))?;
        if entries.is_empty() {
            return Err(Error::Config(format!(
                "lexicon {} contains no terms",
                path.display()
            )));
        }
        Self::from_entries(entries)
    }

    pub fn from_entries(entries: Vec<TermEntry>) -> Result<Self> {
        let mut patterns = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            for term in std::iter::once(&entry.canonical).chain(entry.aliases.iter()) {
                let regex = Regex::new(&boundary_pattern(term))
                    .map_err(|e| Error::Config(format!("bad lexicon term '{term}': {e}")))?;
                patterns.push((index, regex));
            }
        }

        let mut hasher = Sha256::new();
        for entry in &entries {
            hasher.update(entry.canonical.as_bytes());
            hasher.update([0x1f]);
            for alias in &entry.aliases {
                hasher.update(alias.as_bytes());
                hasher.update([0x1e]);
            }
            hasher.update(entry.category.as_bytes());
            hasher.update([0x0a]);
        }
        let digest = format!("{:x}", hasher.finalize());

        Ok(Self {
            entries,
            patterns,
            digest,
        })
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical terms present in `text`. Case variants collapse to one hit.
    pub fn extract(&self, text: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        for (index, regex) in &self.patterns {
            let canonical = &self.entries[*index].canonical;
            if found.contains(canonical) {
                continue;
            }
            if regex.is_match(text) {
                found.insert(canonical.clone());
            }
        }
        found
    }

    /// Cheap signal check: does any term appear at all?
    pub fn contains_any(&self, text: &str) -> bool {
        self.patterns.iter().any(|(_, regex)| regex.is_match(text))
    }
}

/// Case-insensitive whole-word pattern. Word boundaries only make sense next
/// to alphanumerics, so terms like "c++" or ".net" anchor on the side that
/// has one.
fn boundary_pattern(term: &str) -> String {
    let mut pattern = String::from("(?i)");
    if term.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
        pattern.push_str(r"\b");
    }
    pattern.push_str(&regex::escape(term));
    if term.chars().last().is_some_and(|c| c.is_ascii_alphanumeric()) {
        pattern.push_str(r"\b");
    }
    pattern
}

fn default_entries() -> Vec<TermEntry> {
    let e = TermEntry::new;
    vec![
        // Languages
        e("python", &[], "language"),
        e("java", &[], "language"),
        e("javascript", &["js"], "language"),
        e("typescript", &["ts"], "language"),
        e("c++", &["cpp"], "language"),
        e("c#", &["csharp"], "language"),
        e("go", &["golang"], "language"),
        e("rust", &[], "language"),
        e("ruby", &[], "language"),
        e("php", &[], "language"),
        e("swift", &[], "language"),
        e("kotlin", &[], "language"),
        e("scala", &[], "language"),
        e("matlab", &[], "language"),
        e("sql", &[], "language"),
        e("bash", &["shell scripting"], "language"),
        e("perl", &[], "language"),
        e("html", &["html5"], "language"),
        e("css", &["css3"], "language"),
        // Frameworks & APIs
        e("react", &["react.js", "reactjs"], "framework"),
        e("angular", &["angularjs"], "framework"),
        e("vue", &["vue.js", "vuejs"], "framework"),
        e("node.js", &["node", "nodejs"], "framework"),
        e("django", &[], "framework"),
        e("flask", &[], "framework"),
        e("fastapi", &[], "framework"),
        e("spring", &["spring boot"], "framework"),
        e("express", &["express.js"], "framework"),
        e("rails", &["ruby on rails"], "framework"),
        e(".net", &["dotnet", "asp.net"], "framework"),
        e("next.js", &["nextjs"], "framework"),
        e("svelte", &[], "framework"),
        e("graphql", &[], "framework"),
        e("rest api", &["rest apis", "restful api", "restful apis", "restful"], "framework"),
        e("grpc", &[], "framework"),
        e("websocket", &["websockets"], "framework"),
        // Cloud & infrastructure
        e("aws", &["amazon web services"], "cloud"),
        e("azure", &[], "cloud"),
        e("gcp", &["google cloud"], "cloud"),
        e("docker", &[], "cloud"),
        e("kubernetes", &["k8s"], "cloud"),
        e("terraform", &[], "cloud"),
        e("ansible", &[], "cloud"),
        e("jenkins", &[], "cloud"),
        e("ci/cd", &["cicd", "continuous integration"], "cloud"),
        e("linux", &["unix"], "cloud"),
        e("git", &[], "cloud"),
        e("github actions", &[], "cloud"),
        e("gitlab", &[], "cloud"),
        e("helm", &[], "cloud"),
        e("nginx", &[], "cloud"),
        e("kafka", &["apache kafka"], "cloud"),
        e("rabbitmq", &[], "cloud"),
        e("serverless", &[], "cloud"),
        // Databases
        e("postgresql", &["postgres"], "database"),
        e("mysql", &[], "database"),
        e("sqlite", &[], "database"),
        e("mongodb", &["mongo"], "database"),
        e("redis", &[], "database"),
        e("elasticsearch", &[], "database"),
        e("dynamodb", &[], "database"),
        e("cassandra", &[], "database"),
        e("snowflake", &[], "database"),
        e("bigquery", &[], "database"),
        // ML & data
        e("machine learning", &["ml"], "ml"),
        e("deep learning", &[], "ml"),
        e("pytorch", &[], "ml"),
        e("tensorflow", &[], "ml"),
        e("keras", &[], "ml"),
        e("scikit-learn", &["sklearn"], "ml"),
        e("pandas", &[], "ml"),
        e("numpy", &[], "ml"),
        e("opencv", &[], "ml"),
        e("nlp", &["natural language processing"], "ml"),
        e("computer vision", &[], "ml"),
        e("llm", &["large language model", "large language models"], "ml"),
        e("spark", &["apache spark", "pyspark"], "ml"),
        e("airflow", &[], "ml"),
        e("data pipeline", &["data pipelines", "etl"], "ml"),
        // Tooling
        e("jira", &[], "tooling"),
        e("selenium", &[], "tooling"),
        e("playwright", &[], "tooling"),
        e("cypress", &[], "tooling"),
        e("pytest", &[], "tooling"),
        e("junit", &[], "tooling"),
        e("jest", &[], "tooling"),
        e("webpack", &[], "tooling"),
        e("tableau", &[], "tooling"),
        e("power bi", &[], "tooling"),
    ]
}
