use thiserror::Error;

#[derive(Error, Debug)]
pub enum PgScrubError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File does not start with PGDMP")]
    BadMagic,

    #[error("Unsupported dump format version {0}.{1}.{2}")]
    UnsupportedVersion(u8, u8, u8),

    #[error("Unsupported archive format {0}, only custom (1) is supported")]
    UnsupportedFormat(u8),

    #[error("Invalid compression descriptor: {0}")]
    BadCompression(String),

    #[error("Creation timestamp is not a valid date")]
    BadDate,

    #[error("Invalid UTF-8 in string: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("Unexpected end of stream")]
    UnexpectedEof,

    #[error("Corrupt dump: {0}")]
    Corrupt(String),

    #[error("Transformer failed: {0}")]
    Transform(String),
}

pub type Result<T> = std::result::Result<T, PgScrubError>;
