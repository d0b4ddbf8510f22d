//! Error taxonomy for the analytics service.
//!
//! Split along the module seams: archive storage, upstream API access, and
//! the analysis pipeline that composes the two. User-visible failures are
//! rendered as structured JSON by the HTTP layer; these types stay internal.

use chrono::{DateTime, Utc};

/// A raw query that normalized to the empty string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("empty or invalid query")]
pub struct InvalidQuery;

/// Errors raised by the segmented archive store.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index parse error: {0}")]
    IndexFormat(#[from] serde_json::Error),

    #[error("segment bounds overlap: {0}")]
    BoundsOverlap(String),

    #[error("invalid post range: min {min} exceeds max {max}")]
    InvalidRange { min: u64, max: u64 },

    #[error("unfinished segment already registered in index")]
    UnfinishedExists,

    #[error("no unfinished segment to finalize")]
    NoUnfinished,

    #[error("no posts at this date; first post was at {0}")]
    BeforeFirstPost(DateTime<Utc>),

    #[error("no posts at this date; last post was at {0}")]
    AfterLastPost(DateTime<Utc>),

    #[error("archive holds no segments")]
    Empty,
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Errors raised by the upstream social API client.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("connection to upstream lost")]
    Connection,

    #[error("rate limited by upstream")]
    RateLimited,

    #[error("malformed JSON from upstream after {attempts} attempts")]
    MalformedJson { attempts: u32 },

    #[error("upstream rejected credentials: {0}")]
    Auth(String),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("credential file error: {0}")]
    Credentials(String),
}

impl UpstreamError {
    /// Whether this error is a broken TCP connection, as opposed to a
    /// well-formed HTTP-level rejection. Drives the tracker's backoff tier.
    pub fn is_connection(&self) -> bool {
        match self {
            UpstreamError::Connection => true,
            UpstreamError::Transport(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Whether this is an HTTP-level error (bad status, broken body).
    pub fn is_http(&self) -> bool {
        matches!(
            self,
            UpstreamError::Status(_) | UpstreamError::MalformedJson { .. } | UpstreamError::Auth(_)
        )
    }
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Errors raised by the on-demand analysis pipeline.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("influence graph is empty: {0}")]
    EmptyGraph(String),

    #[error("analysis worker failed: {0}")]
    Worker(String),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
