use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Failures talking to the CheckList server.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Any non-2xx response. The status is never branched on.
    #[error("server responded {status}: {body}")]
    Http { status: u16, body: String },

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// One failed fetch handed to every caller that waited on it.
    #[error(transparent)]
    Shared(Arc<ApiError>),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no API URL configured, set CHECKLIST_API_URL or api_url in {0}")]
    MissingApiUrl(String),

    #[error("no data directory available for {0}, set it explicitly")]
    NoDataDir(&'static str),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("corrupt session file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to encode session: {0}")]
    Encode(#[from] toml::ser::Error),
}
