//! Vault error types.

use std::io;
use thiserror::Error;

/// Vault error type.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Mutation attempted on a protected path.
    #[error("path is locked: {0}")]
    Locked(String),

    /// A sibling with that name already exists at the destination.
    #[error("name already exists: {0}")]
    Collision(String),

    /// Resolve or restore target is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation aborted via its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Underlying storage failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed structured document.
    #[error("parse error: {0}")]
    Parse(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VaultError {
    /// Create a Locked error.
    pub fn locked(path: impl Into<String>) -> Self {
        Self::Locked(path.into())
    }

    /// Create a Collision error.
    pub fn collision(path: impl Into<String>) -> Self {
        Self::Collision(path.into())
    }

    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a Parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Returns true for the cancellation condition.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true when the error means "no such entry", whether it
    /// came from the vault or from underlying storage.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Convert VaultError to std::io::Error for compatibility.
impl From<VaultError> for io::Error {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::Locked(msg) => io::Error::new(io::ErrorKind::PermissionDenied, msg),
            VaultError::Collision(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VaultError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VaultError::Cancelled => {
                io::Error::new(io::ErrorKind::Interrupted, "operation cancelled")
            }
            VaultError::Io(e) => e,
            VaultError::Parse(msg) => io::Error::new(io::ErrorKind::InvalidData, msg),
            VaultError::Other(msg) => io::Error::other(msg),
        }
    }
}

/// Vault result type.
pub type VaultResult<T> = Result<T, VaultError>;
