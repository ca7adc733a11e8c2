use crate::block_dev::BlockDeviceError;

/// Filesystem error types.
///
/// Every variant is recoverable at the command level: the command rolls its
/// directory traversal back and the filesystem stays usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
  #[error("No free blocks left on device")]
  NoFreeBlocks,
  #[error("No free slot left in directory")]
  NoFreeDirectorySlot,
  #[error("No such file or directory")]
  FileNotFound,
  #[error("File exists")]
  NameCollision,
  #[error("Not a file")]
  NotAFile,
  #[error("Not a directory")]
  NotADirectory,
  #[error("Permission denied")]
  PermissionDenied,
  #[error("No such directory")]
  PathNotFound,
  #[error("Invalid argument")]
  InvalidArgument,
  #[error("Disk I/O error")]
  DiskIOError,
}

impl From<BlockDeviceError> for FsError {
  fn from(err: BlockDeviceError) -> Self {
    log::warn!("block device: {}", err);
    FsError::DiskIOError
  }
}

pub type FsResult<T> = Result<T, FsError>;
