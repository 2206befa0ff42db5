use std::fmt;
use std::io;

/// Unified error type for the storage engine.
#[derive(Debug)]
pub enum Error {
    /// IO error from disk operations.
    Io(io::Error),
    /// Data corruption detected (CRC mismatch, bad format, etc).
    Corruption(String),
    /// Invalid configuration or argument (comparator mismatch, bad options).
    /// Always fatal at open, never silently downgraded.
    InvalidArgument(String),
    /// Key not found.
    NotFound,
    /// Unexpected end of file/data.
    Eof,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Corruption(msg) => write!(f, "Corruption: {msg}"),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            Error::NotFound => write!(f, "Not found"),
            Error::Eof => write!(f, "Unexpected end of file"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl Error {
    /// A stored background error is re-surfaced to every later caller, so it
    /// must be duplicable. `io::Error` is not `Clone`; rebuild it from
    /// kind + text.
    pub(crate) fn duplicate(&self) -> Error {
        match self {
            Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
            Error::Corruption(m) => Error::Corruption(m.clone()),
            Error::InvalidArgument(m) => Error::InvalidArgument(m.clone()),
            Error::NotFound => Error::NotFound,
            Error::Eof => Error::Eof,
        }
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
