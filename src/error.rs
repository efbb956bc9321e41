use thiserror::Error;

/// Failures of the block device contract.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Terminal: once a disk breaks, every later request fails.
    #[error("disk is broken")]
    Broken,
    #[error("disk indexed with sector {sector} but disk only has {sectors} sectors")]
    OutOfBounds { sector: usize, sectors: usize },
    #[error("transfer of {0} bytes is not one sector")]
    BadLength(usize),
    #[error("bad disk image: {0}")]
    BadImage(String),
    #[error("disk i/o: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no frame can be reclaimed, every resident block is pinned")]
    PoolExhausted,
    #[error("block {0} is not resident")]
    NotResident(usize),
    #[error("page access of {len} bytes at offset {offset} overruns the page")]
    PageBounds { offset: usize, len: usize },
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Layout, codec and configuration failures.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("record codec: {0}")]
    Codec(#[from] bincode::Error),
    #[error("corrupt {what}: {why}")]
    Corrupt { what: &'static str, why: String },
    #[error("bad config: {0}")]
    Config(String),
    #[error("{frames} cache pages is below the minimum of {min}")]
    TooFewFrames { frames: usize, min: usize },
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Syscall failures. Every kind with an errno is caller visible and recoverable.
#[derive(Debug, Error)]
pub enum VfsError {
    #[error("{0}: File not found!")]
    FileNotFound(String),
    #[error("{0}: File already exists!")]
    FileAlreadyExists(String),
    #[error("{0}: File size reached the limit!")]
    FileSizeLimit(String),
    #[error("{0}: Disk Full!")]
    DiskFull(String),
    #[error("{0}: No more inodes left!")]
    InodeFull(String),
    #[error("{0}: Directory entries full!")]
    DentryFull(String),
    #[error("fd {0}: Bad file descriptor.")]
    BadFileDescriptor(usize),
    #[error("{0}: File Name too long.")]
    NameTooLong(String),
    /// a NUL, or trailing blanks the directory record cannot keep
    #[error("{0:?}: File Name cannot be stored.")]
    InvalidName(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Layout(#[from] FsError),
}

impl From<DeviceError> for VfsError {
    fn from(err: DeviceError) -> Self {
        VfsError::Cache(CacheError::Device(err))
    }
}

impl VfsError {
    /// Classic negative error code, `None` for hard failures.
    pub fn errno(&self) -> Option<i32> {
        match self {
            VfsError::FileNotFound(_) => Some(-1),
            VfsError::FileAlreadyExists(_) => Some(-2),
            VfsError::FileSizeLimit(_) => Some(-3),
            VfsError::DiskFull(_) => Some(-4),
            VfsError::InodeFull(_) => Some(-5),
            VfsError::DentryFull(_) => Some(-6),
            VfsError::BadFileDescriptor(_) => Some(-7),
            VfsError::NameTooLong(_) | VfsError::InvalidName(_) => Some(-8),
            VfsError::Cache(_) | VfsError::Layout(_) => None,
        }
    }

    /// A device failure anywhere below the syscall.
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            VfsError::Cache(CacheError::Device(_)) | VfsError::Layout(FsError::Device(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_codes() {
        assert_eq!(Some(-1), VfsError::FileNotFound("a".into()).errno());
        assert_eq!(Some(-6), VfsError::DentryFull("a".into()).errno());
        assert_eq!(Some(-8), VfsError::NameTooLong("a".into()).errno());
        assert_eq!(Some(-8), VfsError::InvalidName("a ".into()).errno());
        assert_eq!(None, VfsError::from(DeviceError::Broken).errno());
    }

    #[test]
    fn device_failures_are_recognised() {
        assert!(VfsError::from(DeviceError::Broken).is_device_failure());
        assert!(!VfsError::BadFileDescriptor(3).is_device_failure());
    }

    #[test]
    fn messages_name_the_file() {
        let err = VfsError::FileAlreadyExists("notes".into());
        assert_eq!("notes: File already exists!", err.to_string());
    }
}
