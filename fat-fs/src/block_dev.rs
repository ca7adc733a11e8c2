use core::any::Any;

use alloc::{vec, vec::Vec};
use spin::Mutex;

use crate::{BLOCK_COUNT, BLOCK_SZ, DataBlock};

/// Failure reported by a block device
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BlockDeviceError {
  #[error("block {0} is out of range")]
  OutOfRange(usize),
  #[error("buffer of {0} bytes is not one block")]
  BadBuffer(usize),
  #[error("device I/O failed on block {0}")]
  Io(usize),
}

/// API provided for File System
pub trait BlockDevice: Send + Sync + Any {
  /// read from block data to `buf`
  fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), BlockDeviceError>;

  /// write data back to block
  fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), BlockDeviceError>;
}

/// A block device held entirely in memory.
///
/// Blocks start zeroed, which reads back as an unformatted filesystem.
pub struct RamDisk {
  blocks: Mutex<Vec<DataBlock>>,
}

impl RamDisk {
  pub fn new() -> Self {
    Self::with_blocks(BLOCK_COUNT)
  }

  pub fn with_blocks(blocks: usize) -> Self {
    Self {
      blocks: Mutex::new(vec![[0u8; BLOCK_SZ]; blocks]),
    }
  }
}

impl Default for RamDisk {
  fn default() -> Self {
    Self::new()
  }
}

impl BlockDevice for RamDisk {
  fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), BlockDeviceError> {
    if buf.len() != BLOCK_SZ {
      return Err(BlockDeviceError::BadBuffer(buf.len()));
    }
    let blocks = self.blocks.lock();
    let blk = blocks.get(block_id).ok_or(BlockDeviceError::OutOfRange(block_id))?;
    buf.copy_from_slice(blk);
    Ok(())
  }

  fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), BlockDeviceError> {
    if buf.len() != BLOCK_SZ {
      return Err(BlockDeviceError::BadBuffer(buf.len()));
    }
    let mut blocks = self.blocks.lock();
    let blk = blocks.get_mut(block_id).ok_or(BlockDeviceError::OutOfRange(block_id))?;
    blk.copy_from_slice(buf);
    Ok(())
  }
}
