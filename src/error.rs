use thiserror::Error;

/// Failures talking to the disclosure service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("rate limited by disclosure service")]
    RateLimited,

    #[error("request timed out")]
    Timeout,

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("service error {status}: {message}")]
    Service { status: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::RateLimited | FetchError::Timeout => true,
            FetchError::Status(code) => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = e.status() {
            if status.as_u16() == 429 {
                FetchError::RateLimited
            } else {
                FetchError::Status(status.as_u16())
            }
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

/// The fetched bytes do not hold a usable main document.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("service returned an error payload instead of an archive ({status}: {message})")]
    ServicePayload { status: String, message: String },

    #[error("not a zip archive (leading bytes {0:02x?})")]
    NotAnArchive(Vec<u8>),

    #[error("corrupt archive: {0}")]
    Corrupt(String),

    #[error("no markup document in archive ({0} entries)")]
    NoMainDocument(usize),
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(e: zip::result::ZipError) -> Self {
        ArchiveError::Corrupt(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not decode document as {primary} or {fallback}")]
pub struct DecodeError {
    pub primary: &'static str,
    pub fallback: &'static str,
}

/// Anything that makes a single record fail after deduplication.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("archive invalid: {0}")]
    Archive(#[from] ArchiveError),

    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("worker failed: {0}")]
    Worker(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("could not list filings: {0}")]
    List(#[source] FetchError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(FetchError::RateLimited.is_transient());
        assert!(FetchError::Timeout.is_transient());
        assert!(FetchError::Status(503).is_transient());
        assert!(FetchError::Status(429).is_transient());
        assert!(!FetchError::Status(404).is_transient());
        assert!(!FetchError::NotFound("x".into()).is_transient());
        assert!(!FetchError::Service {
            status: "010".into(),
            message: "unregistered key".into()
        }
        .is_transient());
    }

    #[test]
    fn record_error_wraps_sources() {
        let e: RecordError = FetchError::Timeout.into();
        assert_eq!(e.to_string(), "fetch failed: request timed out");
        let e: RecordError = ArchiveError::NoMainDocument(3).into();
        assert_eq!(e.to_string(), "archive invalid: no markup document in archive (3 entries)");
    }
}
