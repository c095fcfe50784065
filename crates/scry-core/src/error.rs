use thiserror::Error;

/// Failure of a single read against the target address space.
///
/// This is the hot-path error: it is `Copy`, carries no heap data and is
/// expected to happen routinely while the target mutates its memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("invalid address {0:#x}")]
    InvalidAddress(u64),

    #[error("address {address:#x} (+{len}) is not mapped")]
    Unmapped { address: u64, len: usize },

    #[error("short read at {address:#x}: wanted {wanted} bytes, got {got}")]
    Truncated {
        address: u64,
        wanted: usize,
        got: usize,
    },

    #[error("backend failure reading {address:#x}")]
    Backend { address: u64 },
}

impl ReadError {
    /// Address the failed read was aimed at.
    pub fn address(&self) -> u64 {
        match *self {
            ReadError::InvalidAddress(address)
            | ReadError::Unmapped { address, .. }
            | ReadError::Truncated { address, .. }
            | ReadError::Backend { address } => address,
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error("World root not found")]
    WorldNotFound,

    #[error("Session has ended")]
    SessionEnded,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    /// Session-terminal errors unwind the whole session; everything else is
    /// contained by the unit that produced it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::SessionEnded | Error::Cancelled)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }
}
