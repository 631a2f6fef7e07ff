use thiserror::Error;

/// Failures at the backend boundary (REST + socket).
///
/// Callers that drive the table only care that *something* failed, so the
/// session flattens all of these into its error flag; the variants exist for
/// logging.
#[derive(Debug, Error)]
pub enum ChartError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("malformed payload: {0}")]
    Decode(String),

    #[error("socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid filter: {0}")]
    Filter(String),

    #[error("invalid paging: {0}")]
    Paging(String),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl From<serde_json::Error> for ChartError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
