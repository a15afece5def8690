use std::collections::TryReserveError;
use std::fmt::{self, Formatter};
use std::{io, result};

/// Result type for operations that could result in [TidelogError]
pub type Result<T> = result::Result<T, TidelogError>;

#[derive(Debug)]
pub enum TidelogError {
    /// The configuration handed to `Db::open` cannot describe a valid
    /// database: oversized keys, erase blocks that do not divide a file,
    /// a missing file for an enabled feature, and so on.
    Config(String),
    /// The storage backend reported a failure. Surfaced to the caller,
    /// never retried.
    Io(io::Error),
    /// The storage backend refused an operation without an underlying
    /// `io::Error`, e.g. a read of a page that was never written.
    Storage(String),
    /// Put received a key that is not strictly greater than the last
    /// successfully inserted key. The write was rejected.
    OutOfOrder,
    /// Heap allocation failed while materialising a variable-length
    /// payload. The fixed part of the record is unaffected.
    Alloc,
    /// tidelog has internal invariants that we are unable to ask the
    /// compiler to check for us. This error is raised when one of those
    /// invariants does not hold during execution.
    Internal(String),
}

impl fmt::Display for TidelogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TidelogError::Config(desc) => {
                write!(f, "Invalid configuration: {}", desc)
            }
            TidelogError::Io(e) => write!(f, "Io error: {}", e),
            TidelogError::Storage(desc) => {
                write!(f, "Storage error: {}", desc)
            }
            TidelogError::OutOfOrder => {
                write!(f, "Keys must be inserted in strictly ascending order")
            }
            TidelogError::Alloc => {
                write!(f, "Failed to allocate memory for variable data")
            }
            TidelogError::Internal(desc) => {
                write!(
                    f,
                    "Internal error: {}. This was likely caused by a bug",
                    desc
                )
            }
        }
    }
}

impl std::error::Error for TidelogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TidelogError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TidelogError {
    fn from(e: io::Error) -> Self {
        TidelogError::Io(e)
    }
}

impl From<TryReserveError> for TidelogError {
    fn from(_: TryReserveError) -> Self {
        TidelogError::Alloc
    }
}
