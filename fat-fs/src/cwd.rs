//! The directory window and the transactions around it.
//!
//! Only one directory is held in memory at a time. Every command snapshots
//! that window before it starts moving it around, and ends by either
//! committing (persist and return to where it started) or rolling back
//! (drop the snapshot back in without persisting anything).
use crate::{
  ROOT_BLOCK,
  error::FsResult,
  fs::FileSystem,
  layout::{AccessRights, DirEntry, Directory},
  path::{DirLoader, DirRef},
};

/// The directory currently loaded into memory
#[derive(Debug, Clone)]
pub struct CwdState {
  entries: Directory,
  info: DirEntry,
  block_id: u16,
  /// dirty bit
  modified: bool,
}

impl CwdState {
  pub fn new(dir: DirRef, entries: Directory) -> Self {
    Self {
      entries,
      info: dir.info,
      block_id: dir.block_id,
      modified: false,
    }
  }

  pub fn entries(&self) -> &Directory {
    &self.entries
  }

  /// The entry describing this directory from its parent
  pub fn info(&self) -> &DirEntry {
    &self.info
  }

  pub fn block_id(&self) -> u16 {
    self.block_id
  }

  pub fn rights(&self) -> AccessRights {
    self.info.access_rights
  }

  pub fn is_root(&self) -> bool {
    self.block_id == ROOT_BLOCK
  }

  pub fn is_modified(&self) -> bool {
    self.modified
  }

  pub fn dir_ref(&self) -> DirRef {
    DirRef {
      block_id: self.block_id,
      info: self.info.clone(),
    }
  }

  pub(crate) fn set_info(&mut self, info: DirEntry) {
    self.info = info;
  }

  pub(crate) fn set_rights(&mut self, access_rights: AccessRights) {
    self.info.access_rights = access_rights;
  }

  /// Map closure `f` onto the loaded entries
  pub fn read<V>(&self, f: impl FnOnce(&Directory) -> V) -> V {
    f(&self.entries)
  }

  /// Map closure `f` onto the loaded entries, marking the window dirty
  pub(crate) fn modify<V>(&mut self, f: impl FnOnce(&mut Directory) -> V) -> V {
    self.modified = true;
    f(&mut self.entries)
  }

  pub(crate) fn mark_clean(&mut self) {
    self.modified = false;
  }

  fn mark_dirty(&mut self) {
    self.modified = true;
  }
}

/// A value copy of the window taken when a command starts.
///
/// Consumed by exactly one of [`Transaction::commit`], [`Transaction::adopt`]
/// or [`Transaction::rollback`].
#[must_use = "a transaction must be committed, adopted or rolled back"]
pub struct Transaction {
  saved: CwdState,
}

impl Transaction {
  pub fn begin(cwd: &CwdState) -> Self {
    Self { saved: cwd.clone() }
  }

  /// The directory the command started in; relative paths start here
  pub fn origin(&self) -> DirRef {
    self.saved.dir_ref()
  }

  /// Persist the window, then move it back to the directory the command
  /// started in, with whatever that directory holds now.
  pub fn commit(self, fs: &mut FileSystem) -> FsResult<()> {
    fs.persist_window();
    if fs.cwd.block_id == self.saved.block_id {
      return Ok(());
    }
    let entries = fs.load_dir(self.saved.block_id)?;
    let mut back = self.saved;
    back.entries = entries;
    back.mark_clean();
    fs.cwd = back;
    fs.mirror_root();
    Ok(())
  }

  /// Persist the window and keep it where the command left it
  pub fn adopt(self, fs: &mut FileSystem) {
    fs.persist_window();
    log::debug!("cwd: now block {}", fs.cwd.block_id);
  }

  /// Put the snapshot back without persisting the current window.
  ///
  /// If the window left the snapshot's directory, that directory was written
  /// on the way out; the restored copy is marked dirty.
  pub fn rollback(self, fs: &mut FileSystem) {
    let moved = fs.cwd.block_id != self.saved.block_id;
    let mut back = self.saved;
    if moved {
      back.mark_dirty();
    }
    log::debug!("cwd: rolled back to block {}", back.block_id);
    fs.cwd = back;
    fs.mirror_root();
  }
}
