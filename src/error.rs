use thiserror::Error;

/// Failure taxonomy of the volume.
///
/// Everything except [`FsError::DeviceUnavailable`] is a recoverable,
/// expected condition reported to the caller as a normal value. A missing
/// device means the record layer cannot proceed at all and is only
/// expected during teardown.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("page store is not loaded")]
    DeviceUnavailable,
    #[error("no free pages left on the volume")]
    OutOfSpace,
    #[error("permission denied")]
    PermissionDenied,
    #[error("no such file or folder")]
    NotFound,
    #[error("name is empty, too long, or contains an illegal byte")]
    InvalidName,
    #[error("username is already taken")]
    NameTaken,
    #[error("all user slots are in use")]
    UserTableFull,
    #[error("unknown user or wrong password")]
    BadCredentials,
    #[error("page {0} does not hold the expected record kind")]
    BadPageTag(u16),
    #[error("content chain ended before the recorded file size")]
    CorruptChain,
}

pub type Result<T> = core::result::Result<T, FsError>;
