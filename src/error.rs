use thiserror::Error;

/// Failures at the stats API boundary. "Not found" is never one of these; lookups return
/// `Ok(None)` for that.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("FACEIT API key not configured")]
    MissingApiKey,

    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("upstream returned http {status}")]
    Upstream { status: u16 },

    #[error("api error: {code}")]
    Envelope { code: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
