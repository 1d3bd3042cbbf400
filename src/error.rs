use thiserror::Error;

/// Behavioral error categories. The pipeline is the sole decision point for
/// fatal vs isolated handling, so every failure a component can raise maps to
/// one of these variants rather than a stringly-typed blob.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("portal authentication failed: {0}")]
    Auth(String),

    #[error("fetch failed for job {job_id}: {reason}")]
    Fetch { job_id: String, reason: String },

    #[error("portal action failed: {0}")]
    Portal(String),

    #[error("embedding model load failed: {0}")]
    ModelLoad(String),

    #[error("embedding failed: {0}")]
    Encode(String),

    #[error("matcher error: {0}")]
    Matcher(String),

    #[error("resume index error: {0}")]
    Index(String),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error must abort the whole run. Everything else is
    /// isolated to the job that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::Auth(_)
                | Error::ModelLoad(_)
                | Error::Index(_)
                | Error::Store(_)
                | Error::Io(_)
                | Error::Cancelled
        )
    }

    /// Process exit code for a fatal error. Auth failures and user
    /// cancellation get reserved codes so scripts can tell them apart.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Auth(_) => 2,
            Error::Cancelled => 130,
            _ => 1,
        }
    }
}
