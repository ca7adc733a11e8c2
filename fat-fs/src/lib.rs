//! A FAT-chained filesystem with hierarchical directories, living on a
//! fixed-size block device.
//!
//! Block 0 holds the root directory, block 1 holds the FAT, every other block
//! is free, a piece of a file's data chain, or a directory's entry array.
#![no_std]

extern crate alloc;

mod block_dev;
mod cwd;
mod error;
mod fat;
mod fs;
mod layout;
mod path;
mod vfs;

/// Size of one block in bytes
pub const BLOCK_SZ: usize = 4096;
/// One 16-bit FAT slot per block, the whole table fits in one block
pub const BLOCK_COUNT: usize = BLOCK_SZ / 2;
pub const ROOT_BLOCK: u16 = 0;
pub const FAT_BLOCK: u16 = 1;

/// One block worth of bytes
pub type DataBlock = [u8; BLOCK_SZ];

pub use block_dev::{BlockDevice, BlockDeviceError, RamDisk};
pub use cwd::{CwdState, Transaction};
pub use error::{FsError, FsResult};
pub use fat::{FatTable, FAT_EOF, FAT_FREE};
pub use fs::FileSystem;
pub use layout::{
  AccessRights, DirEntry, Directory, EntryKind, EntryName, DIRENT_SZ, DIR_ENTRIES, NAME_LENGTH_LIMIT,
};
pub use path::{split_path, DirLoader, DirRef};
pub use vfs::Listing;
