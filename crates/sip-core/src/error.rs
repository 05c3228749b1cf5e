use std::io;
use thiserror::Error;

/// A type alias for handling `Result`s with `Error` values.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or parsing SIP messages
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Invalid SIP method
    #[error("Invalid SIP method: {0}")]
    InvalidMethod(String),

    /// Invalid SIP version
    #[error("Invalid SIP version: {0}")]
    InvalidVersion(String),

    /// Invalid status code
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// Invalid header name or value
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Invalid URI
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// A required header is absent
    #[error("Missing header: {0}")]
    MissingHeader(String),

    /// Malformed message framing or start line
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    /// Body could not be decoded
    #[error("Invalid body: {0}")]
    InvalidBody(String),

    /// nom reported an error
    #[error("Parser error: {0}")]
    Parser(String),

    /// I/O error (kept as a string so the enum stays `Clone`)
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl<E: std::fmt::Debug> From<nom::Err<E>> for Error {
    fn from(err: nom::Err<E>) -> Self {
        match err {
            nom::Err::Incomplete(_) => Error::Parser("incomplete input".to_string()),
            nom::Err::Error(e) | nom::Err::Failure(e) => Error::Parser(format!("{:?}", e)),
        }
    }
}
