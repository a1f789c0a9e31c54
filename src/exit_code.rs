//! Process exit codes for the `semindex` binary.
//!
//! - `0`: success
//! - `1`: unspecified failure
//! - `2`: blocking failure that automation should not retry blindly
//! - `3-125`: specific, usually recoverable failures

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,

    /// Corrupt local state or a misconfigured model
    BlockingError = 2,

    /// Query ran but returned nothing, or the kind was never published
    NotFound = 3,

    /// Artifact store or embedding provider could not be reached
    Unavailable = 4,

    /// Local cache file system errors
    IoError = 5,

    ConfigError = 6,

    /// Optimistic publish lost to concurrent writers
    Conflict = 7,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl ExitCode {
    /// `Success` when any match came back, `NotFound` otherwise.
    pub fn from_match_count(count: usize) -> Self {
        if count > 0 {
            ExitCode::Success
        } else {
            ExitCode::NotFound
        }
    }

    pub fn from_error(error: &SyncError) -> Self {
        match error {
            SyncError::CacheUnavailable { .. } => ExitCode::NotFound,
            SyncError::EmbeddingUnavailable { .. }
            | SyncError::StoreUnavailable { .. }
            | SyncError::CorpusUnavailable { .. } => ExitCode::Unavailable,
            SyncError::CacheCorrupt { .. }
            | SyncError::ModelUnavailable { .. }
            | SyncError::Vector { .. } => ExitCode::BlockingError,
            SyncError::VersionConflict { .. } => ExitCode::Conflict,
            SyncError::Io { .. } => ExitCode::IoError,
            SyncError::Config { .. } => ExitCode::ConfigError,
        }
    }

    /// The most severe code among several per-kind results.
    pub fn worst<'a, I>(errors: I) -> Self
    where
        I: IntoIterator<Item = &'a SyncError>,
    {
        errors
            .into_iter()
            .map(Self::from_error)
            .max_by_key(|code| code.severity())
            .unwrap_or(ExitCode::Success)
    }

    fn severity(&self) -> u8 {
        match self {
            ExitCode::Success => 0,
            ExitCode::NotFound => 1,
            ExitCode::Conflict => 2,
            ExitCode::Unavailable => 3,
            ExitCode::GeneralError => 4,
            ExitCode::IoError => 5,
            ExitCode::ConfigError => 6,
            ExitCode::BlockingError => 7,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }

    pub fn description(&self) -> &str {
        match self {
            ExitCode::Success => "Success",
            ExitCode::GeneralError => "General error",
            ExitCode::BlockingError => "Blocking error - automation should halt",
            ExitCode::NotFound => "Not found",
            ExitCode::Unavailable => "Dependency unavailable",
            ExitCode::IoError => "I/O error",
            ExitCode::ConfigError => "Configuration error",
            ExitCode::Conflict => "Concurrent publish conflict",
        }
    }
}
