use std::io;
use thiserror::Error;

/// Win32 `ERROR_FILE_NOT_FOUND`.
pub const CODE_NOT_FOUND: i32 = 2;
/// Win32 `ERROR_ACCESS_DENIED`.
pub const CODE_ACCESS_DENIED: i32 = 5;
/// Win32 `ERROR_ALREADY_EXISTS`.
pub const CODE_ALREADY_EXISTS: i32 = 183;
/// Win32 `ERROR_INVALID_PARAMETER`.
pub const CODE_INVALID_PARAMETER: i32 = 87;
/// Win32 `ERROR_NOT_SUPPORTED`.
pub const CODE_NOT_SUPPORTED: i32 = 50;
/// Win32 `ERROR_GEN_FAILURE`.
pub const CODE_GENERIC_FAILURE: i32 = 31;

pub type Result<T> = std::result::Result<T, CimError>;

#[derive(Debug, Error)]
pub enum CimError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("IO error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Image engine error: {context} (code {code:#010x})")]
    Engine { context: String, code: i32 },

    #[error("Verification failed: {0} mismatch(es)")]
    VerificationFailed(usize),
}

impl CimError {
    /// Classify an I/O error, keeping the kinds callers match on.
    pub fn from_io(context: impl Into<String>, err: io::Error) -> Self {
        let context = context.into();
        match err.kind() {
            // A file where a directory was expected: nothing lives below it.
            io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => CimError::NotFound(context),
            io::ErrorKind::PermissionDenied => CimError::AccessDenied(context),
            io::ErrorKind::AlreadyExists => CimError::AlreadyExists(context),
            _ => CimError::Io { context, source: err },
        }
    }

    /// Generic I/O failure that must not be reclassified.
    pub fn io(context: impl Into<String>, err: io::Error) -> Self {
        CimError::Io {
            context: context.into(),
            source: err,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CimError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, CimError::AlreadyExists(_))
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, CimError::AccessDenied(_))
    }

    /// Numeric process exit code for this error.
    pub fn code(&self) -> i32 {
        match self {
            CimError::NotFound(_) => CODE_NOT_FOUND,
            CimError::AlreadyExists(_) => CODE_ALREADY_EXISTS,
            CimError::AccessDenied(_) => CODE_ACCESS_DENIED,
            CimError::Io { source, .. } => source
                .raw_os_error()
                .filter(|code| *code != 0)
                .unwrap_or(CODE_GENERIC_FAILURE),
            CimError::InvalidInput(_) => CODE_INVALID_PARAMETER,
            CimError::NotSupported(_) => CODE_NOT_SUPPORTED,
            CimError::Engine { code, .. } if *code != 0 => *code,
            CimError::Engine { .. } => CODE_GENERIC_FAILURE,
            CimError::VerificationFailed(_) => 1,
        }
    }
}

impl From<io::Error> for CimError {
    fn from(err: io::Error) -> Self {
        CimError::from_io("I/O operation failed", err)
    }
}

impl From<serde_json::Error> for CimError {
    fn from(err: serde_json::Error) -> Self {
        CimError::InvalidInput(format!("Malformed JSON: {}", err))
    }
}
