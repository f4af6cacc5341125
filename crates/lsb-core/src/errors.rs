
use crate::schedule::ParseError;

/// Core error type.
///
/// Adapter crates map their specific errors into this type so the bot core can
/// tell a recipient that blocked us apart from everything else.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("workbook error: {0}")]
    Workbook(#[from] calamine::XlsxError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The recipient blocked the bot (or deleted their account). Permanent.
    #[error("delivery forbidden: {0}")]
    DeliveryForbidden(String),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Error::DeliveryForbidden(_))
    }

    /// Short stable label used to deduplicate repeated failures in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Storage(_) => "storage",
            Error::Workbook(_) => "workbook",
            Error::Parse(_) => "parse",
            Error::DeliveryForbidden(_) => "forbidden",
            Error::External(_) => "external",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
