use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MatcherConfig;
use crate::error::{Error, Result};
use crate::models::{Compensation, Job};

/// Text-in/text-out LLM contract. Providers hold their own HTTP client and
/// credentials; callers only see prompts and completions.
pub trait LlmProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
    fn name(&self) -> &str;
}

/// Build the configured provider, or None when LLM features are disabled.
/// A configured provider with missing credentials is a startup error.
pub fn create_provider(config: &MatcherConfig) -> Result<Option<Box<dyn LlmProvider>>> {
    match config.llm_provider.as_deref() {
        None => Ok(None),
        Some("anthropic") => Ok(Some(Box::new(AnthropicProvider::new(
            config.llm_model.clone(),
        )?))),
        Some("openai") => Ok(Some(Box::new(OpenAiProvider::new(
            config.llm_model.clone(),
        )?))),
        Some(other) => Err(Error::Config(format!("unknown llm_provider '{other}'"))),
    }
}

// --- Anthropic provider ---

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

pub struct AnthropicProvider {
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl AnthropicProvider {
    pub fn new(model: String) -> Result<Self> {
        let api_key = env::var("ANTHROPIC_API_KEY").map_err(|_| {
            Error::Config("ANTHROPIC_API_KEY is not set but llm_provider is 'anthropic'".to_string())
        })?;
        Ok(Self {
            api_key,
            model,
            client: reqwest::blocking::Client::new(),
        })
    }
}

impl LlmProvider for AnthropicProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .map_err(|e| Error::Llm(format!("anthropic request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(Error::Llm(format!("anthropic returned {status}: {body}")));
        }

        let parsed: AnthropicResponse = response
            .json()
            .map_err(|e| Error::Llm(format!("bad anthropic response: {e}")))?;
        parsed
            .content
            .first()
            .map(|block| block.text.clone())
            .ok_or_else(|| Error::Llm("empty anthropic response".to_string()))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// --- OpenAI provider ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    max_completion_tokens: u32,
    messages: Vec<OpenAiMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

pub struct OpenAiProvider {
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl OpenAiProvider {
    pub fn new(model: String) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").map_err(|_| {
            Error::Config("OPENAI_API_KEY is not set but llm_provider is 'openai'".to_string())
        })?;
        Ok(Self {
            api_key,
            model,
            client: reqwest::blocking::Client::new(),
        })
    }
}

impl LlmProvider for OpenAiProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = OpenAiRequest {
            model: self.model.clone(),
            max_completion_tokens: max_tokens,
            messages: vec![OpenAiMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(OPENAI_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .map_err(|e| Error::Llm(format!("openai request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(Error::Llm(format!("openai returned {status}: {body}")));
        }

        let parsed: OpenAiResponse = response
            .json()
            .map_err(|e| Error::Llm(format!("bad openai response: {e}")))?;
        parsed
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| Error::Llm("empty openai response".to_string()))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// --- Cover letter generation ---

/// Generate a cover letter for a job, grounding the draft in the resume
/// lines that the matcher found relevant.
pub fn generate_cover_letter(
    provider: &dyn LlmProvider,
    job: &Job,
    highlights: &[String],
) -> Result<String> {
    let mut evidence_block = String::new();
    for highlight in highlights.iter().take(8) {
        evidence_block.push_str("- ");
        evidence_block.push_str(highlight);
        evidence_block.push('\n');
    }
    if evidence_block.is_empty() {
        evidence_block.push_str("(no matched experience supplied)\n");
    }

    let prompt = format!(
        "Write a concise, professional cover letter (250-350 words) for the posting below.\n\
        Rules:\n\
        - Only claim experience from the candidate highlights; never invent facts\n\
        - Address the company by name and reference the role\n\
        - No salutation placeholders like [Hiring Manager Name]; use \"Dear Hiring Team\"\n\
        - Plain paragraphs, no markdown\n\n\
        Position: {title}\n\
        Company: {company}\n\n\
        Posting summary:\n{summary}\n\n\
        Key requirements:\n{skills}\n\n\
        Candidate highlights:\n{evidence_block}",
        title = job.title,
        company = job.company,
        summary = job.summary,
        skills = job.skills,
    );

    let letter = provider.complete(&prompt, 4096)?;
    if letter.trim().is_empty() {
        return Err(Error::Llm("provider returned an empty cover letter".to_string()));
    }
    Ok(letter.trim().to_string())
}

/// Fill the cover letter template and write it under `out_dir`. Returns the
/// rendered file path.
pub fn render_cover_letter(
    template_path: Option<&Path>,
    job: &Job,
    body: &str,
    out_dir: &Path,
) -> Result<PathBuf> {
    const DEFAULT_TEMPLATE: &str = "# Cover Letter - {title} at {company}\n\n{body}\n";
    let template = match template_path {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read template {}: {e}", path.display())))?,
        None => DEFAULT_TEMPLATE.to_string(),
    };

    let rendered = template
        .replace("{title}", &job.title)
        .replace("{company}", &job.company)
        .replace("{job_id}", &job.job_id)
        .replace("{body}", body);

    fs::create_dir_all(out_dir)?;
    let out_path = out_dir.join(format!("cover_{}.md", job.job_id));
    fs::write(&out_path, rendered)?;
    Ok(out_path)
}

// --- Compensation extraction ---

const UNKNOWN_COMPENSATION: &[&str] = &["", "n/a", "none", "tbd", "to be discussed", "competitive"];

/// Normalize a raw compensation string via the LLM: highest value of a
/// range, currency, and period, or all-null when the text promises nothing.
pub fn extract_compensation(provider: &dyn LlmProvider, raw: &str) -> Result<Compensation> {
    let trimmed = raw.trim();
    if UNKNOWN_COMPENSATION.contains(&trimmed.to_lowercase().as_str()) {
        return Ok(Compensation::default());
    }

    let prompt = format!(
        "Extract compensation from this job posting text.\n\
        Rules:\n\
        - If a range is given, return the HIGHEST value\n\
        - value is a bare number (no symbols or commas)\n\
        - currency is \"CAD\" or \"USD\" (assume CAD when unspecified)\n\
        - period is \"hourly\", \"monthly\", or \"yearly\"\n\
        - \"TBD\", \"competitive\" or similar mean unknown: all fields null\n\n\
        Text: \"{trimmed}\"\n\n\
        Respond with ONLY this JSON, no markdown:\n\
        {{\"value\": 35.0, \"currency\": \"CAD\", \"period\": \"hourly\"}}"
    );

    let response = provider.complete(&prompt, 256)?;
    let cleaned = strip_code_fences(&response);
    let parsed: Compensation = serde_json::from_str(cleaned)
        .map_err(|e| Error::Llm(format!("unparseable compensation JSON '{cleaned}': {e}")))?;
    debug!(raw = trimmed, ?parsed, "extracted compensation");
    Ok(parsed)
}

/// Regex fallback when no LLM is configured: handles plain "$X" and
/// "$X - $Y" shapes with an optional period suffix.
pub fn fallback_compensation(raw: &str) -> Compensation {
    let trimmed = raw.trim();
    if UNKNOWN_COMPENSATION.contains(&trimmed.to_lowercase().as_str()) {
        return Compensation::default();
    }

    let amount = match Regex::new(r"\$\s*([0-9][0-9,]*(?:\.[0-9]+)?)") {
        Ok(re) => re
            .captures_iter(trimmed)
            .filter_map(|cap| cap.get(1))
            .filter_map(|m| m.as_str().replace(',', "").parse::<f64>().ok())
            .fold(None::<f64>, |best, v| Some(best.map_or(v, |b| b.max(v)))),
        Err(_) => None,
    };
    let Some(value) = amount else {
        return Compensation::default();
    };

    let lower = trimmed.to_lowercase();
    let currency = if lower.contains("usd") { "USD" } else { "CAD" };
    let period = if lower.contains("hour") || lower.contains("/hr") {
        Some("hourly")
    } else if lower.contains("month") {
        Some("monthly")
    } else if lower.contains("year") || lower.contains("annum") || lower.contains("annual") {
        Some("yearly")
    } else {
        None
    };

    Compensation {
        value: Some(value),
        currency: Some(currency.to_string()),
        period: period.map(str::to_string),
    }
}

fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}
