use alloc::sync::Arc;

use crate::{
  BLOCK_SZ, DataBlock, ROOT_BLOCK,
  block_dev::BlockDevice,
  cwd::{CwdState, Transaction},
  error::{FsError, FsResult},
  fat::FatTable,
  layout::{AccessRights, Directory},
  path::{self, DirLoader, DirRef},
};

/// A mounted filesystem.
///
/// Owns the FAT and the root directory, both loaded once when the device is
/// opened and written back by [`FileSystem::sync`], plus the one directory
/// window every command works through.
pub struct FileSystem {
  pub(crate) block_dev: Arc<dyn BlockDevice>,
  pub(crate) fat: FatTable,
  /// mirror of the root directory
  pub(crate) root: Directory,
  pub(crate) cwd: CwdState,
}

impl FileSystem {
  /// Format `block_dev` and mount it
  pub fn format_device(block_dev: Arc<dyn BlockDevice>) -> FsResult<Self> {
    let root = Directory::init(ROOT_BLOCK, AccessRights::all());
    let mut fs = Self {
      block_dev,
      fat: FatTable::new(),
      cwd: CwdState::new(DirRef::root(AccessRights::all()), root.clone()),
      root,
    };
    fs.format()?;
    Ok(fs)
  }

  /// Open a block device as a filesystem
  pub fn open(block_dev: Arc<dyn BlockDevice>) -> FsResult<Self> {
    let fat = FatTable::load(&block_dev)?;
    if !fat.is_formatted() {
      log::warn!("device holds no filesystem, format it before use");
    }
    let root = Self::read_dir(&block_dev, ROOT_BLOCK)?;
    let root_ref = DirRef::root(root.parent().access_rights);
    log::info!("opened filesystem, {} free block(s)", fat.free_count());
    Ok(Self {
      block_dev,
      fat,
      cwd: CwdState::new(root_ref, root.clone()),
      root,
    })
  }

  pub fn block_device(&self) -> &Arc<dyn BlockDevice> {
    &self.block_dev
  }

  pub fn fat(&self) -> &FatTable {
    &self.fat
  }

  pub fn cwd(&self) -> &CwdState {
    &self.cwd
  }

  pub fn is_formatted(&self) -> bool {
    self.fat.is_formatted()
  }

  /// Write the window, the root directory and the FAT back to the device
  pub fn sync(&mut self) -> FsResult<()> {
    self.write_window()?;
    self.block_dev.write_block(ROOT_BLOCK as usize, &self.root.encode())?;
    self.fat.store(&self.block_dev)?;
    log::info!("synced filesystem, {} free block(s)", self.fat.free_count());
    Ok(())
  }

  fn read_dir(block_dev: &Arc<dyn BlockDevice>, block_id: u16) -> FsResult<Directory> {
    let mut blk: DataBlock = [0; BLOCK_SZ];
    block_dev.read_block(block_id as usize, &mut blk)?;
    Ok(Directory::decode(&blk))
  }

  fn write_window(&mut self) -> FsResult<()> {
    if self.cwd.is_modified() {
      self.block_dev.write_block(self.cwd.block_id() as usize, &self.cwd.entries().encode())?;
      self.cwd.mark_clean();
    }
    self.mirror_root();
    Ok(())
  }

  /// Write the window if it is dirty. Panics when the device refuses.
  pub(crate) fn persist_window(&mut self) {
    if let Err(err) = self.write_window() {
      log::error!("failed to persist directory block {}: {}", self.cwd.block_id(), err);
      panic!("directory block {} could not be written back", self.cwd.block_id());
    }
  }

  /// Refresh the root mirror when the window is the root
  pub(crate) fn mirror_root(&mut self) {
    if self.cwd.is_root() {
      self.root = self.cwd.entries().clone();
    }
  }

  /// Move the window to `target`, persisting the one it leaves
  pub(crate) fn enter(&mut self, target: DirRef) -> FsResult<()> {
    if target.block_id == self.cwd.block_id() {
      self.cwd.set_info(target.info);
      return Ok(());
    }
    let entries = self.load_dir(target.block_id)?;
    self.persist_window();
    log::debug!("cwd: block {} -> {}", self.cwd.block_id(), target.block_id);
    self.cwd = CwdState::new(target, entries);
    Ok(())
  }

  /// Walk `path` from the window and make the result the new window.
  /// On failure the window stays where it was.
  pub fn change_directory(&mut self, path: &str) -> FsResult<()> {
    let origin = self.cwd.dir_ref();
    self.change_directory_from(&origin, path)
  }

  pub(crate) fn change_directory_from(&mut self, origin: &DirRef, path: &str) -> FsResult<()> {
    let target = path::walk(self, origin, path)?;
    self.enter(target)
  }

  /// Split `path` into its file name and containing directory, walking from
  /// `origin`
  pub(crate) fn resolve<'p>(&self, origin: &DirRef, path: &'p str) -> FsResult<(&'p str, DirRef)> {
    path::resolve(self, origin, path)
  }

  /// Apply `f` to the directory stored at `block_id`. The window is patched
  /// in memory, any other directory is written straight back.
  pub(crate) fn patch_dir<V>(&mut self, block_id: u16, f: impl FnOnce(&mut Directory) -> V) -> FsResult<V> {
    if block_id == self.cwd.block_id() {
      return Ok(self.cwd.modify(f));
    }
    let mut dir = self.load_dir(block_id)?;
    let ret = f(&mut dir);
    self.block_dev.write_block(block_id as usize, &dir.encode())?;
    if block_id == ROOT_BLOCK {
      self.root = dir;
    }
    Ok(ret)
  }

  /// Run a command body inside a transaction: commit when it succeeds, roll
  /// back when it fails. The body gets the directory the command started in.
  pub(crate) fn transact<V>(&mut self, f: impl FnOnce(&mut Self, &DirRef) -> FsResult<V>) -> FsResult<V> {
    let tx = Transaction::begin(&self.cwd);
    let origin = tx.origin();
    match f(self, &origin) {
      Ok(ret) => {
        tx.commit(self)?;
        Ok(ret)
      }
      Err(err) => {
        tx.rollback(self);
        Err(err)
      }
    }
  }

  /// Fail unless the window grants every right in `needed`
  pub(crate) fn require_window(&self, needed: AccessRights) -> FsResult<()> {
    if self.cwd.rights().contains(needed) {
      Ok(())
    } else {
      Err(FsError::PermissionDenied)
    }
  }
}

impl DirLoader for FileSystem {
  fn load_dir(&self, block_id: u16) -> FsResult<Directory> {
    if block_id == self.cwd.block_id() {
      Ok(self.cwd.entries().clone())
    } else if block_id == ROOT_BLOCK {
      Ok(self.root.clone())
    } else {
      Self::read_dir(&self.block_dev, block_id)
    }
  }

  fn root_rights(&self) -> AccessRights {
    if self.cwd.is_root() {
      self.cwd.entries().parent().access_rights
    } else {
      self.root.parent().access_rights
    }
  }
}

impl Drop for FileSystem {
  fn drop(&mut self) {
    if let Err(err) = self.sync() {
      log::error!("failed to sync filesystem on drop: {}", err);
    }
  }
}
