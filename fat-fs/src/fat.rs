use alloc::sync::Arc;
use core::cmp::min;

use crate::{
  BLOCK_COUNT, BLOCK_SZ, DataBlock, FAT_BLOCK, ROOT_BLOCK,
  block_dev::BlockDevice,
  error::{FsError, FsResult},
};

/// Slot value of a block that belongs to no chain
pub const FAT_FREE: i16 = 0;
/// Slot value of the last block of a chain
pub const FAT_EOF: i16 = -1;

/// The file allocation table: one signed slot per block, holding either
/// `FAT_FREE`, `FAT_EOF` or the id of the next block in the chain.
#[derive(Clone)]
pub struct FatTable {
  slots: [i16; BLOCK_COUNT],
}

impl FatTable {
  /// A freshly formatted table, only the root and FAT blocks in use
  pub fn new() -> Self {
    let mut slots = [FAT_FREE; BLOCK_COUNT];
    slots[ROOT_BLOCK as usize] = FAT_EOF;
    slots[FAT_BLOCK as usize] = FAT_EOF;
    Self { slots }
  }

  /// Load the table from the FAT block
  pub fn load(block_dev: &Arc<dyn BlockDevice>) -> FsResult<Self> {
    let mut blk: DataBlock = [0; BLOCK_SZ];
    block_dev.read_block(FAT_BLOCK as usize, &mut blk)?;
    let mut slots = [FAT_FREE; BLOCK_COUNT];
    slots.iter_mut()
      .zip(blk.chunks_exact(2))
      .for_each(|(slot, raw)| *slot = i16::from_le_bytes([raw[0], raw[1]]));
    Ok(Self { slots })
  }

  /// Write the table back to the FAT block
  pub fn store(&self, block_dev: &Arc<dyn BlockDevice>) -> FsResult<()> {
    let mut blk: DataBlock = [0; BLOCK_SZ];
    blk.chunks_exact_mut(2)
      .zip(self.slots.iter())
      .for_each(|(raw, slot)| raw.copy_from_slice(&slot.to_le_bytes()));
    block_dev.write_block(FAT_BLOCK as usize, &blk)?;
    Ok(())
  }

  /// A table is usable only once its reserved blocks are marked in use.
  /// A zeroed device reads back as all free.
  pub fn is_formatted(&self) -> bool {
    self.slots[ROOT_BLOCK as usize] == FAT_EOF && self.slots[FAT_BLOCK as usize] == FAT_EOF
  }

  /// Raw slot value of `block_id`
  pub fn get(&self, block_id: u16) -> i16 {
    self.slots[block_id as usize]
  }

  /// Next block of the chain, `None` at the end of the chain
  pub fn next(&self, block_id: u16) -> Option<u16> {
    match self.slots[block_id as usize] {
      n if n > 0 && (n as usize) < BLOCK_COUNT => Some(n as u16),
      _ => None,
    }
  }

  /// Number of blocks currently free
  pub fn free_count(&self) -> usize {
    self.slots.iter().filter(|slot| **slot == FAT_FREE).count()
  }

  /// returns the first free block
  pub fn find_free_block(&self) -> FsResult<u16> {
    self.slots.iter()
      .position(|slot| *slot == FAT_FREE)
      .map(|idx| idx as u16)
      .ok_or(FsError::NoFreeBlocks)
  }

  /// Take the first free block and mark it as the end of a chain
  pub fn alloc_block(&mut self) -> FsResult<u16> {
    let block_id = self.find_free_block()?;
    self.slots[block_id as usize] = FAT_EOF;
    log::debug!("fat: allocated block {}", block_id);
    Ok(block_id)
  }

  /// Iterate over the blocks of the chain starting at `start`.
  /// Never yields more than `BLOCK_COUNT` ids, even on a corrupted table.
  pub fn chain(&self, start: u16) -> Chain<'_> {
    Chain {
      fat: self,
      cur: Some(start),
      left: BLOCK_COUNT,
    }
  }

  /// Write `data` block by block starting at `start`, which the caller has
  /// already allocated. Further blocks are allocated and linked as needed and
  /// the last one is terminated with `FAT_EOF`. Empty data still writes one
  /// zeroed block.
  ///
  /// Blocks linked before an allocation failure stay linked.
  pub fn write_chain(
    &mut self,
    block_dev: &Arc<dyn BlockDevice>,
    start: u16,
    data: &[u8],
  ) -> FsResult<()> {
    let mut cur = start;
    self.slots[cur as usize] = FAT_EOF;
    let mut chunks = data.chunks(BLOCK_SZ);
    let mut chunk = chunks.next().unwrap_or(&[]);
    loop {
      let mut blk: DataBlock = [0; BLOCK_SZ];
      blk[..chunk.len()].copy_from_slice(chunk);
      block_dev.write_block(cur as usize, &blk)?;
      chunk = match chunks.next() {
        Some(next) => next,
        None => break,
      };
      let next = self.alloc_block()?;
      self.slots[cur as usize] = next as i16;
      cur = next;
    }
    Ok(())
  }

  /// Read the chain starting at `start` into `buf`.
  /// Returns the number of bytes copied, at most `buf.len()`.
  pub fn read_chain(
    &self,
    block_dev: &Arc<dyn BlockDevice>,
    start: u16,
    buf: &mut [u8],
  ) -> FsResult<usize> {
    let mut read_size = 0usize;
    let mut blk: DataBlock = [0; BLOCK_SZ];
    for block_id in self.chain(start) {
      if read_size == buf.len() {
        break;
      }
      block_dev.read_block(block_id as usize, &mut blk)?;
      let block_read_size = min(BLOCK_SZ, buf.len() - read_size);
      buf[read_size..read_size + block_read_size].copy_from_slice(&blk[..block_read_size]);
      read_size += block_read_size;
    }
    Ok(read_size)
  }

  /// Mark every block of the chain starting at `start` free
  pub fn free_chain(&mut self, start: u16) {
    let blocks: alloc::vec::Vec<u16> = self.chain(start).collect();
    for block_id in blocks.iter() {
      self.slots[*block_id as usize] = FAT_FREE;
    }
    log::debug!("fat: freed {} block(s) from {}", blocks.len(), start);
  }

  /// Last block of the chain starting at `start`, and the chain length
  pub fn last_block(&self, start: u16) -> (u16, usize) {
    self.chain(start).fold((start, 0), |(_, len), block_id| (block_id, len + 1))
  }
}

impl Default for FatTable {
  fn default() -> Self {
    Self::new()
  }
}

/// Iterator over one block chain
pub struct Chain<'a> {
  fat: &'a FatTable,
  cur: Option<u16>,
  left: usize,
}

impl Iterator for Chain<'_> {
  type Item = u16;

  fn next(&mut self) -> Option<u16> {
    let cur = self.cur?;
    if self.left == 0 {
      log::warn!("fat: chain through block {} does not terminate", cur);
      self.cur = None;
      return None;
    }
    self.left -= 1;
    self.cur = self.fat.next(cur);
    Some(cur)
  }
}
