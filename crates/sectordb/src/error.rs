//! Error types for sector database operations
//!
//! Every fallible engine call returns a [`SectorResult`]. A missing key is
//! never an error: lookups report it as `Ok(None)` / `Ok(false)`.

use std::path::PathBuf;

use thiserror::Error;

/// Sector database error types with detailed context
#[derive(Debug, Clone, Error)]
pub enum SectorError {
    /// I/O operation failed
    #[error("I/O error{}: {message} ({kind})", path_suffix(.path))]
    Io {
        /// The file path where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// Transactional overwrite larger than the fixed sector allocation
    #[error("sector overwrite too large: {requested} bytes exceeds allocation of {allocated} bytes (file {sector_file}, start {sector_start})")]
    OversizedSector {
        /// Block file holding the existing sector
        sector_file: u32,
        /// Offset of the existing sector
        sector_start: u32,
        /// Bytes currently allocated to the key
        allocated: u32,
        /// Bytes the commit attempted to write
        requested: usize,
    },

    /// Raw key longer than a slot header can describe
    #[error("key too large: {size} bytes exceeds limit of {max} bytes")]
    OversizedKey { size: usize, max: usize },

    /// Payload that can never fit into a block file
    #[error("value too large: {size} bytes exceeds limit of {max} bytes")]
    OversizedValue { size: usize, max: u64 },

    /// Block file index no longer fits the 16-bit slot field
    #[error("sector file index {file} exceeds slot limit of {max}")]
    SectorFileOverflow { file: u32, max: u32 },

    /// Keychain slot bytes could not be decoded
    #[error("corrupt keychain slot in file {file} at bucket {bucket}: {reason}")]
    CorruptSlot { file: u32, bucket: u32, reason: String },

    /// Commit or rollback requested with no transaction in progress
    #[error("no transaction in progress")]
    NoTransaction,

    /// Mutation attempted on a database opened read-only
    #[error("database is read-only")]
    ReadOnly,

    /// Configuration rejected by `Config::validate`
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" in {}", path.display()),
        None => String::new(),
    }
}

impl SectorError {
    /// Wrap an I/O error with the file it happened on.
    pub fn io(path: impl Into<PathBuf>, err: &std::io::Error, context: &str) -> Self {
        SectorError::Io {
            path: Some(path.into()),
            kind: err.kind(),
            message: format!("{}: {}", context, err),
        }
    }
}

/// Convert std::io::Error to SectorError::Io
impl From<std::io::Error> for SectorError {
    fn from(err: std::io::Error) -> Self {
        SectorError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for sector database operations
pub type SectorResult<T> = Result<T, SectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SectorError::OversizedSector {
            sector_file: 2,
            sector_start: 4096,
            allocated: 16,
            requested: 32,
        };

        let display = format!("{}", err);
        assert!(display.contains("32 bytes"));
        assert!(display.contains("allocation of 16"));
        assert!(display.contains("file 2"));
    }

    #[test]
    fn test_io_display_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = SectorError::io("/tmp/_block.00000", &io_err, "open block file");
        let display = err.to_string();
        assert!(display.contains("/tmp/_block.00000"));
        assert!(display.contains("open block file"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SectorError = io_err.into();

        match err {
            SectorError::Io { kind, path, .. } => {
                assert_eq!(kind, std::io::ErrorKind::NotFound);
                assert!(path.is_none());
            }
            _ => panic!("Expected Io error"),
        }
    }
}
