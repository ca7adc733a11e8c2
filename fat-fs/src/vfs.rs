//! The command set. Each command runs inside one transaction.
use core::fmt::{self, Display, Formatter};

use alloc::{
  string::String,
  vec,
  vec::Vec,
};

use crate::{
  BLOCK_COUNT, BLOCK_SZ, DataBlock, ROOT_BLOCK,
  cwd::{CwdState, Transaction},
  error::{FsError, FsResult},
  fat::FatTable,
  fs::FileSystem,
  layout::{AccessRights, DirEntry, Directory, EntryKind, EntryName},
  path::{split_path, walk, DirLoader, DirRef},
};

/// One line of `ls` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
  pub name: EntryName,
  pub kind: EntryKind,
  pub access_rights: AccessRights,
  pub size: u32,
}

impl From<&DirEntry> for Listing {
  fn from(entry: &DirEntry) -> Self {
    Self {
      name: entry.name.clone(),
      kind: entry.kind,
      access_rights: entry.access_rights,
      size: entry.size,
    }
  }
}

impl Display for Listing {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self.kind {
      EntryKind::File => write!(f, "{}\tfile\t{}\t{}", self.name, self.access_rights, self.size),
      EntryKind::Directory => write!(f, "{}\tdir\t{}\t-", self.name, self.access_rights),
    }
  }
}

/// Content of `create`: lines up to the first blank one, joined by newlines
fn collect_lines<I, S>(lines: I) -> String
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  let mut data = String::new();
  for line in lines {
    let line = line.as_ref().trim_end_matches(['\r', '\n']);
    if line.is_empty() {
      break;
    }
    if !data.is_empty() {
      data.push('\n');
    }
    data.push_str(line);
  }
  data
}

/// blocks a chain needs to hold `len` bytes
fn blocks_for(len: usize) -> usize {
  len.div_ceil(BLOCK_SZ).max(1)
}

fn ensure_free(fat: &FatTable, blocks: usize) -> FsResult<()> {
  if fat.free_count() < blocks {
    Err(FsError::NoFreeBlocks)
  } else {
    Ok(())
  }
}

/// Name for a new entry; an empty one means the path named an existing directory
fn new_name(name: &str) -> FsResult<EntryName> {
  if name.is_empty() {
    Err(FsError::NameCollision)
  } else {
    Ok(EntryName::new(name))
  }
}

impl FileSystem {
  /// Create an empty filesystem: every block free except the root and the
  /// FAT, an empty root whose parent link points at itself
  pub fn format(&mut self) -> FsResult<()> {
    let fat = FatTable::new();
    let root = Directory::init(ROOT_BLOCK, AccessRights::all());
    fat.store(&self.block_dev)?;
    self.block_dev.write_block(ROOT_BLOCK as usize, &root.encode())?;
    self.cwd = CwdState::new(DirRef::root(AccessRights::all()), root.clone());
    self.fat = fat;
    self.root = root;
    log::info!("formatted: {} blocks of {} bytes", BLOCK_COUNT, BLOCK_SZ);
    Ok(())
  }

  /// Create a file at `path` holding `lines` up to the first blank one
  pub fn create<I, S>(&mut self, path: &str, lines: I) -> FsResult<()>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    if path.is_empty() {
      return Err(FsError::InvalidArgument);
    }
    let data = collect_lines(lines);
    self.transact(|fs, origin| {
      let (name, dir) = fs.resolve(origin, path)?;
      fs.enter(dir)?;
      fs.require_window(AccessRights::WRITE_EXECUTE)?;
      let name = new_name(name)?;
      fs.insert_file(name, data.as_bytes(), AccessRights::READ_WRITE)
    })
  }

  /// Whole content of the file at `path`
  pub fn read_file(&mut self, path: &str) -> FsResult<Vec<u8>> {
    self.transact(|fs, origin| {
      let entry = fs.enter_file(origin, path)?;
      if !entry.access_rights.contains(AccessRights::READ) {
        return Err(FsError::PermissionDenied);
      }
      fs.read_entry(&entry)
    })
  }

  /// Content of the file at `path` as text
  pub fn cat(&mut self, path: &str) -> FsResult<String> {
    self.read_file(path).map(|data| String::from_utf8_lossy(&data).into_owned())
  }

  /// Entries of the current directory
  pub fn ls(&self) -> FsResult<Vec<Listing>> {
    self.require_window(AccessRights::READ)?;
    Ok(self.cwd.read(|dir| dir.occupied().map(|(_, e)| Listing::from(e)).collect()))
  }

  /// Copy the file `src` to `dst`. When `dst` is a directory the copy keeps
  /// the source's name.
  pub fn cp(&mut self, src: &str, dst: &str) -> FsResult<()> {
    self.transact(|fs, origin| {
      let entry = fs.enter_file(origin, src)?;
      if !entry.access_rights.contains(AccessRights::READ) {
        return Err(FsError::PermissionDenied);
      }
      let data = fs.read_entry(&entry)?;

      let (dst_name, dst_dir) = fs.resolve(origin, dst)?;
      let name = match dst_name {
        "" => entry.name.clone(),
        name => EntryName::new(name),
      };
      fs.enter(dst_dir)?;
      fs.require_window(AccessRights::WRITE)?;
      fs.insert_file(name, &data, entry.access_rights)
    })
  }

  /// Rename the entry `src` to `dst`, or move it into `dst` when that is a
  /// directory. Data chains and directory blocks stay where they are; a
  /// directory moved to another parent gets its ".." link rewritten.
  pub fn mv(&mut self, src: &str, dst: &str) -> FsResult<()> {
    self.transact(|fs, origin| {
      let (src_name, src_dir) = fs.resolve_entry(origin, src)?;
      fs.enter(src_dir.clone())?;
      fs.require_window(AccessRights::WRITE_EXECUTE)?;
      let entry = fs.cwd.entries().find_entry(src_name)?.clone();

      let (dst_name, dst_dir) = fs.resolve(origin, dst)?;
      if entry.is_dir() && fs.is_within(dst_dir.block_id, entry.first_block)? {
        return Err(FsError::InvalidArgument);
      }
      let name = match dst_name {
        "" => entry.name.clone(),
        name => EntryName::new(name),
      };
      let moved_dir = (entry.is_dir() && dst_dir.block_id != src_dir.block_id).then_some(entry.first_block);
      fs.enter(dst_dir)?;
      fs.require_window(AccessRights::WRITE_EXECUTE)?;
      if fs.cwd.entries().contains(name.as_str()) {
        return Err(FsError::NameCollision);
      }
      fs.cwd.modify(|dir| dir.insert(DirEntry { name, ..entry }))?;
      if let Some(block_id) = moved_dir {
        let link = DirEntry::parent_link(fs.cwd.block_id(), fs.cwd.rights());
        fs.patch_dir(block_id, |dir| *dir.parent_mut() = link)?;
      }

      fs.enter(src_dir)?;
      let idx = fs.cwd.entries().position(src_name)?;
      fs.cwd.modify(|dir| dir.clear(idx));
      Ok(())
    })
  }

  /// Delete the file at `path` and free its chain
  pub fn rm(&mut self, path: &str) -> FsResult<()> {
    self.transact(|fs, origin| {
      let (name, dir) = fs.resolve(origin, path)?;
      if name.is_empty() {
        return Err(FsError::NotAFile);
      }
      fs.enter(dir)?;
      fs.require_window(AccessRights::WRITE_EXECUTE)?;
      let idx = fs.cwd.entries().position(name)?;
      let entry = fs.cwd.entries().entry(idx).clone();
      if entry.is_dir() {
        return Err(FsError::NotAFile);
      }
      fs.fat.free_chain(entry.first_block);
      fs.cwd.modify(|dir| dir.clear(idx));
      Ok(())
    })
  }

  /// Append the content of `src` to the end of `dst`; `src` is unchanged
  pub fn append(&mut self, src: &str, dst: &str) -> FsResult<()> {
    self.transact(|fs, origin| {
      let entry = fs.enter_file(origin, src)?;
      if !entry.access_rights.contains(AccessRights::READ) {
        return Err(FsError::PermissionDenied);
      }
      let data = fs.read_entry(&entry)?;

      let target = fs.enter_file(origin, dst)?;
      if !target.access_rights.contains(AccessRights::READ_WRITE) {
        return Err(FsError::PermissionDenied);
      }
      let idx = fs.cwd.entries().position(target.name.as_str())?;
      let (last, chain_len) = fs.fat.last_block(target.first_block);
      let tail_len = (target.size as usize)
        .saturating_sub((chain_len - 1) * BLOCK_SZ)
        .min(BLOCK_SZ);

      let mut blk: DataBlock = [0; BLOCK_SZ];
      fs.block_dev.read_block(last as usize, &mut blk)?;
      let mut buf = Vec::with_capacity(tail_len + data.len());
      buf.extend_from_slice(&blk[..tail_len]);
      buf.extend_from_slice(&data);
      ensure_free(&fs.fat, blocks_for(buf.len()) - 1)?;
      fs.fat.write_chain(&fs.block_dev, last, &buf)?;

      let size = target.size + data.len() as u32;
      fs.cwd.modify(|dir| dir.entry_mut(idx).size = size);
      Ok(())
    })
  }

  /// Create a directory at `path`
  pub fn mkdir(&mut self, path: &str) -> FsResult<()> {
    if path.is_empty() {
      return Err(FsError::InvalidArgument);
    }
    self.transact(|fs, origin| {
      let (name, dir) = fs.resolve(origin, path)?;
      fs.enter(dir)?;
      fs.require_window(AccessRights::WRITE_EXECUTE)?;
      let name = new_name(name)?;
      if fs.cwd.entries().contains(name.as_str()) {
        return Err(FsError::NameCollision);
      }
      fs.cwd.entries().find_empty_slot()?;

      let block_id = fs.fat.alloc_block()?;
      let new_dir = Directory::init(fs.cwd.block_id(), fs.cwd.rights());
      if let Err(err) = fs.block_dev.write_block(block_id as usize, &new_dir.encode()) {
        fs.fat.free_chain(block_id);
        return Err(err.into());
      }
      let entry = DirEntry {
        name,
        size: 0,
        first_block: block_id,
        kind: EntryKind::Directory,
        access_rights: AccessRights::all(),
      };
      fs.cwd.modify(|dir| dir.insert(entry))?;
      Ok(())
    })
  }

  /// Make the directory at `path` the current one
  pub fn cd(&mut self, path: &str) -> FsResult<()> {
    let tx = Transaction::begin(&self.cwd);
    match self
      .change_directory(path)
      .and_then(|_| self.require_window(AccessRights::READ))
    {
      Ok(()) => {
        tx.adopt(self);
        Ok(())
      }
      Err(err) => {
        tx.rollback(self);
        Err(err)
      }
    }
  }

  /// Absolute path of the current directory
  pub fn pwd(&self) -> FsResult<String> {
    let mut names: Vec<EntryName> = Vec::new();
    let mut cur = self.cwd.block_id();
    while cur != ROOT_BLOCK {
      if names.len() >= BLOCK_COUNT {
        return Err(FsError::PathNotFound);
      }
      let parent = self.load_dir(cur)?.parent().first_block;
      let name = self
        .load_dir(parent)?
        .find_child_dir(cur)
        .map(|(_, e)| e.name.clone())
        .ok_or(FsError::PathNotFound)?;
      names.push(name);
      cur = parent;
    }
    if names.is_empty() {
      return Ok(String::from("/"));
    }
    let mut path = String::new();
    for name in names.iter().rev() {
      path.push('/');
      path.push_str(name.as_str());
    }
    Ok(path)
  }

  /// Set the rights of the file or directory at `path`. `rights` is a
  /// decimal value from 0 to 7.
  pub fn chmod(&mut self, rights: &str, path: &str) -> FsResult<()> {
    let rights = AccessRights::parse(rights)?;
    self.transact(|fs, origin| {
      let (name, dir) = fs.resolve(origin, path)?;
      fs.enter(dir)?;
      if name.is_empty() {
        return fs.chmod_window(rights);
      }
      let idx = fs.cwd.entries().position(name)?;
      let entry = fs.cwd.modify(|dir| {
        dir.entry_mut(idx).access_rights = rights;
        dir.entry(idx).clone()
      });
      if entry.is_dir() {
        fs.propagate_rights(entry.first_block, rights)?;
      }
      Ok(())
    })
  }

  /// chmod of the directory the window is on: its entry lives in the parent
  /// (the root keeps its own rights in its parent link)
  fn chmod_window(&mut self, rights: AccessRights) -> FsResult<()> {
    let block_id = self.cwd.block_id();
    if block_id == ROOT_BLOCK {
      self.cwd.modify(|dir| dir.parent_mut().access_rights = rights);
    } else {
      let parent = self.cwd.entries().parent().first_block;
      self.patch_dir(parent, |dir| -> FsResult<()> {
        let (idx, _) = dir.find_child_dir(block_id).ok_or(FsError::PathNotFound)?;
        dir.entry_mut(idx).access_rights = rights;
        Ok(())
      })??;
    }
    self.cwd.set_rights(rights);
    self.propagate_rights(block_id, rights)
  }

  /// Rewrite the parent link of every immediate subdirectory of the
  /// directory at `block_id`
  fn propagate_rights(&mut self, block_id: u16, rights: AccessRights) -> FsResult<()> {
    let children: Vec<u16> = self
      .load_dir(block_id)?
      .occupied()
      .filter(|(_, e)| e.is_dir())
      .map(|(_, e)| e.first_block)
      .collect();
    for child in children {
      self.patch_dir(child, |dir| dir.parent_mut().access_rights = rights)?;
    }
    log::debug!("chmod: propagated {} to children of block {}", rights, block_id);
    Ok(())
  }

  /// Move the window to the directory holding the file at `path` and return
  /// the file's entry
  fn enter_file(&mut self, origin: &DirRef, path: &str) -> FsResult<DirEntry> {
    let (name, dir) = self.resolve(origin, path)?;
    if name.is_empty() {
      return Err(FsError::NotAFile);
    }
    self.enter(dir)?;
    let entry = self.cwd.entries().find_entry(name)?.clone();
    if !entry.is_file() {
      return Err(FsError::NotAFile);
    }
    Ok(entry)
  }

  /// Split `path` into the name of an existing entry and the directory
  /// holding it. Unlike [`FileSystem::resolve`] a directory path names the
  /// directory's own entry.
  fn resolve_entry<'p>(&self, origin: &DirRef, path: &'p str) -> FsResult<(&'p str, DirRef)> {
    let (dir_path, name) = split_path(path.trim_end_matches('/'));
    if matches!(name, "" | "." | "..") {
      return Err(FsError::InvalidArgument);
    }
    Ok((name, walk(self, origin, dir_path)?))
  }

  /// Whether the directory at `block_id` is `ancestor` or lies below it
  fn is_within(&self, block_id: u16, ancestor: u16) -> FsResult<bool> {
    let mut cur = block_id;
    for _ in 0..BLOCK_COUNT {
      if cur == ancestor {
        return Ok(true);
      }
      if cur == ROOT_BLOCK {
        return Ok(false);
      }
      cur = self.load_dir(cur)?.parent().first_block;
    }
    Err(FsError::PathNotFound)
  }

  fn read_entry(&self, entry: &DirEntry) -> FsResult<Vec<u8>> {
    let mut buf = vec![0u8; entry.size as usize];
    let len = self.fat.read_chain(&self.block_dev, entry.first_block, &mut buf)?;
    buf.truncate(len);
    Ok(buf)
  }

  /// Store `data` in a new chain and add a file entry for it to the window
  fn insert_file(&mut self, name: EntryName, data: &[u8], rights: AccessRights) -> FsResult<()> {
    if self.cwd.entries().contains(name.as_str()) {
      return Err(FsError::NameCollision);
    }
    self.cwd.entries().find_empty_slot()?;
    ensure_free(&self.fat, blocks_for(data.len()))?;
    let first_block = self.fat.alloc_block()?;
    self.fat.write_chain(&self.block_dev, first_block, data)?;
    let entry = DirEntry {
      name,
      size: data.len() as u32,
      first_block,
      kind: EntryKind::File,
      access_rights: rights,
    };
    self.cwd.modify(|dir| dir.insert(entry))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{BlockDevice, BlockDeviceError, RamDisk, layout::DIR_ENTRIES};
  use alloc::{format, string::ToString, sync::Arc};
  use core::sync::atomic::{AtomicBool, Ordering};

  fn fs() -> FileSystem {
    let dev: Arc<dyn BlockDevice> = Arc::new(RamDisk::new());
    FileSystem::format_device(dev).unwrap()
  }

  /// A RamDisk whose reads or writes can be made to fail
  #[derive(Default)]
  struct FlakyDisk {
    disk: RamDisk,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
  }

  impl BlockDevice for FlakyDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), BlockDeviceError> {
      if self.fail_reads.load(Ordering::Relaxed) {
        return Err(BlockDeviceError::Io(block_id));
      }
      self.disk.read_block(block_id, buf)
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), BlockDeviceError> {
      if self.fail_writes.load(Ordering::Relaxed) {
        return Err(BlockDeviceError::Io(block_id));
      }
      self.disk.write_block(block_id, buf)
    }
  }

  fn flaky_fs() -> (Arc<FlakyDisk>, FileSystem) {
    let disk = Arc::new(FlakyDisk::default());
    let fs = FileSystem::format_device(disk.clone()).unwrap();
    (disk, fs)
  }

  fn names(fs: &FileSystem) -> Vec<String> {
    fs.ls().unwrap().into_iter().map(|l| l.name.to_string()).collect()
  }

  #[test]
  fn create_then_cat() {
    let mut fs = fs();
    fs.create("/a.txt", ["hello", ""]).unwrap();
    assert_eq!(fs.cat("/a.txt").unwrap(), "hello");
    fs.create("b.txt", ["one", "two", "", "ignored"]).unwrap();
    assert_eq!(fs.cat("b.txt").unwrap(), "one\ntwo");
    fs.create("empty", [""]).unwrap();
    assert_eq!(fs.cat("empty").unwrap(), "");
  }

  #[test]
  fn multi_block_content_survives() {
    let mut fs = fs();
    let line: String = (0..BLOCK_SZ * 3 + 17).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    fs.create("/big", [line.as_str()]).unwrap();
    assert_eq!(fs.cat("/big").unwrap(), line);
    assert_eq!(fs.ls().unwrap()[0].size as usize, line.len());
  }

  #[test]
  fn create_refuses_collisions() {
    let mut fs = fs();
    fs.create("/a", ["x"]).unwrap();
    fs.mkdir("/d").unwrap();
    assert_eq!(fs.create("/a", ["y"]), Err(FsError::NameCollision));
    assert_eq!(fs.create("/d", ["y"]), Err(FsError::NameCollision));
    assert_eq!(fs.mkdir("/a"), Err(FsError::NameCollision));
    assert_eq!(fs.create("/nope/a", ["y"]), Err(FsError::PathNotFound));
    assert_eq!(fs.create("", ["y"]), Err(FsError::InvalidArgument));
    assert_eq!(fs.cat("/a").unwrap(), "x");
  }

  #[test]
  fn rm_returns_blocks() {
    let mut fs = fs();
    let free = fs.fat().free_count();
    let data = "z".repeat(BLOCK_SZ * 2 + 1);
    fs.create("/f", [data.as_str()]).unwrap();
    assert_eq!(fs.fat().free_count(), free - 3);
    fs.rm("/f").unwrap();
    assert_eq!(fs.fat().free_count(), free);
    assert_eq!(fs.cat("/f"), Err(FsError::FileNotFound));
    fs.create("/g", [data.as_str()]).unwrap();
    assert_eq!(fs.fat().free_count(), free - 3);
  }

  #[test]
  fn rm_refuses_directories() {
    let mut fs = fs();
    fs.mkdir("/d").unwrap();
    assert_eq!(fs.rm("/d"), Err(FsError::NotAFile));
    assert_eq!(fs.rm("/missing"), Err(FsError::FileNotFound));
    assert_eq!(names(&fs), ["d"]);
  }

  #[test]
  fn cp_makes_independent_copy() {
    let mut fs = fs();
    fs.create("/src", ["payload"]).unwrap();
    fs.mkdir("/d").unwrap();
    fs.cp("/src", "/dst").unwrap();
    fs.cp("/src", "/d").unwrap();
    fs.rm("/src").unwrap();
    assert_eq!(fs.cat("/dst").unwrap(), "payload");
    assert_eq!(fs.cat("/d/src").unwrap(), "payload");
    assert_eq!(fs.cp("/dst", "/d/src"), Err(FsError::NameCollision));
    assert_eq!(fs.cp("/d", "/x"), Err(FsError::NotAFile));
  }

  #[test]
  fn mv_renames_and_moves() {
    let mut fs = fs();
    fs.create("/a.txt", ["hello"]).unwrap();
    fs.mkdir("/sub").unwrap();
    fs.mv("/a.txt", "/b.txt").unwrap();
    assert_eq!(names(&fs), ["sub", "b.txt"]);
    fs.mv("/b.txt", "/sub").unwrap();
    assert_eq!(names(&fs), ["sub"]);
    fs.cd("/sub").unwrap();
    assert_eq!(names(&fs), ["b.txt"]);
    assert_eq!(fs.cat("b.txt").unwrap(), "hello");
    fs.mv("b.txt", "../c.txt").unwrap();
    assert!(names(&fs).is_empty());
    assert_eq!(fs.cat("/c.txt").unwrap(), "hello");
  }

  #[test]
  fn mv_refuses_collision_and_keeps_source() {
    let mut fs = fs();
    fs.create("/a", ["1"]).unwrap();
    fs.create("/b", ["2"]).unwrap();
    assert_eq!(fs.mv("/a", "/b"), Err(FsError::NameCollision));
    assert_eq!(fs.cat("/a").unwrap(), "1");
    assert_eq!(fs.cat("/b").unwrap(), "2");
  }

  #[test]
  fn mv_renames_directory() {
    let mut fs = fs();
    fs.mkdir("/d").unwrap();
    fs.create("/d/f", ["x"]).unwrap();
    fs.mv("/d", "/e").unwrap();
    assert_eq!(names(&fs), ["e"]);
    assert_eq!(fs.cat("/e/f").unwrap(), "x");
    fs.cd("/e").unwrap();
    assert_eq!(fs.pwd().unwrap(), "/e");
    fs.cd("..").unwrap();
    assert_eq!(fs.pwd().unwrap(), "/");
  }

  #[test]
  fn mv_relinks_directory_to_new_parent() {
    let mut fs = fs();
    fs.mkdir("/a").unwrap();
    fs.mkdir("/b").unwrap();
    fs.mkdir("/a/c").unwrap();
    fs.create("/a/c/f", ["inside"]).unwrap();
    fs.chmod("3", "/b").unwrap();
    let b_block = fs.cwd().entries().find_entry("b").unwrap().first_block;

    fs.mv("/a/c", "/b").unwrap();
    fs.cd("/a").unwrap();
    assert!(names(&fs).is_empty());
    fs.cd("/b/c").unwrap();
    assert_eq!(fs.pwd().unwrap(), "/b/c");
    let link = fs.cwd().entries().parent();
    assert_eq!(link.first_block, b_block);
    assert_eq!(link.access_rights, AccessRights::WRITE_EXECUTE);
    assert_eq!(fs.cat("f").unwrap(), "inside");
  }

  #[test]
  fn mv_refuses_directory_into_itself() {
    let mut fs = fs();
    fs.mkdir("/a").unwrap();
    fs.mkdir("/a/b").unwrap();
    assert_eq!(fs.mv("/a", "/a"), Err(FsError::InvalidArgument));
    assert_eq!(fs.mv("/a", "/a/b"), Err(FsError::InvalidArgument));
    assert_eq!(fs.mv("/a", "/a/b/c"), Err(FsError::InvalidArgument));
    assert_eq!(fs.mv("/", "/x"), Err(FsError::InvalidArgument));
    assert_eq!(names(&fs), ["a"]);
    fs.cd("/a/b").unwrap();
    assert_eq!(fs.pwd().unwrap(), "/a/b");
  }

  #[test]
  fn device_write_error_rolls_back() {
    let (disk, mut fs) = flaky_fs();
    fs.create("/src", ["data"]).unwrap();
    disk.fail_writes.store(true, Ordering::Relaxed);
    assert_eq!(fs.create("/a", ["x"]), Err(FsError::DiskIOError));
    assert_eq!(fs.cp("/src", "/dst"), Err(FsError::DiskIOError));
    assert_eq!(names(&fs), ["src"]);
    assert!(fs.cwd().is_root() && !fs.cwd().is_modified());

    disk.fail_writes.store(false, Ordering::Relaxed);
    fs.cp("/src", "/dst").unwrap();
    assert_eq!(fs.cat("/dst").unwrap(), "data");
  }

  #[test]
  fn device_read_error_keeps_window() {
    let (disk, mut fs) = flaky_fs();
    fs.mkdir("/d").unwrap();
    fs.create("/f", ["x"]).unwrap();
    disk.fail_reads.store(true, Ordering::Relaxed);
    assert_eq!(fs.cd("/d"), Err(FsError::DiskIOError));
    assert_eq!(fs.cat("/f"), Err(FsError::DiskIOError));
    assert!(fs.cwd().is_root());
    disk.fail_reads.store(false, Ordering::Relaxed);
    assert_eq!(fs.cat("/f").unwrap(), "x");
  }

  #[test]
  #[should_panic(expected = "could not be written back")]
  fn failed_window_write_back_is_fatal() {
    let (disk, mut fs) = flaky_fs();
    fs.create("/f", ["x"]).unwrap();
    fs.mkdir("/a").unwrap();
    disk.fail_writes.store(true, Ordering::Relaxed);
    // returning to the source directory writes the dirtied /a back
    let _ = fs.mv("/f", "/a/g");
  }

  #[test]
  fn append_grows_across_blocks() {
    let mut fs = fs();
    let head = "h".repeat(BLOCK_SZ - 3);
    fs.create("/dst", [head.as_str()]).unwrap();
    fs.create("/src", ["tail!"]).unwrap();
    let free = fs.fat().free_count();
    fs.append("/src", "/dst").unwrap();
    assert_eq!(fs.cat("/dst").unwrap(), format!("{}tail!", head));
    assert_eq!(fs.cat("/src").unwrap(), "tail!");
    assert_eq!(fs.fat().free_count(), free - 1);
    fs.append("/src", "/dst").unwrap();
    assert_eq!(fs.cat("/dst").unwrap(), format!("{}tail!tail!", head));
  }

  #[test]
  fn append_onto_full_block() {
    let mut fs = fs();
    let head = "q".repeat(BLOCK_SZ);
    fs.create("/dst", [head.as_str()]).unwrap();
    fs.create("/src", ["x"]).unwrap();
    fs.append("/src", "/dst").unwrap();
    assert_eq!(fs.cat("/dst").unwrap(), format!("{}x", head));
    fs.append("/dst", "/dst").unwrap();
    assert_eq!(fs.cat("/dst").unwrap().len(), (BLOCK_SZ + 1) * 2);
  }

  #[test]
  fn append_needs_rights() {
    let mut fs = fs();
    fs.create("/a", ["a"]).unwrap();
    fs.create("/b", ["b"]).unwrap();
    fs.chmod("4", "/b").unwrap();
    assert_eq!(fs.append("/a", "/b"), Err(FsError::PermissionDenied));
    fs.chmod("2", "/a").unwrap();
    fs.chmod("6", "/b").unwrap();
    assert_eq!(fs.append("/a", "/b"), Err(FsError::PermissionDenied));
    assert_eq!(fs.cat("/a"), Err(FsError::PermissionDenied));
  }

  #[test]
  fn mkdir_cd_pwd() {
    let mut fs = fs();
    assert_eq!(fs.pwd().unwrap(), "/");
    fs.mkdir("/a").unwrap();
    fs.mkdir("/a/b").unwrap();
    fs.cd("/a/b").unwrap();
    assert_eq!(fs.pwd().unwrap(), "/a/b");
    fs.cd("..").unwrap();
    assert_eq!(fs.pwd().unwrap(), "/a");
    fs.mkdir("c").unwrap();
    fs.cd("c").unwrap();
    assert_eq!(fs.pwd().unwrap(), "/a/c");
    fs.cd("../../").unwrap();
    assert_eq!(fs.pwd().unwrap(), "/");
    assert_eq!(fs.cd("/a/missing"), Err(FsError::PathNotFound));
    assert_eq!(fs.pwd().unwrap(), "/");
  }

  #[test]
  fn commands_keep_the_current_directory() {
    let mut fs = fs();
    fs.mkdir("/a").unwrap();
    fs.mkdir("/b").unwrap();
    fs.cd("/a").unwrap();
    fs.create("/b/f", ["data"]).unwrap();
    fs.create("g", ["local"]).unwrap();
    assert_eq!(fs.pwd().unwrap(), "/a");
    assert_eq!(names(&fs), ["g"]);
    fs.cp("../b/f", "h").unwrap();
    assert_eq!(fs.pwd().unwrap(), "/a");
    assert_eq!(names(&fs), ["g", "h"]);
    assert_eq!(fs.cat("h").unwrap(), "data");
  }

  #[test]
  fn cd_into_file_fails() {
    let mut fs = fs();
    fs.create("/f", ["x"]).unwrap();
    assert_eq!(fs.cd("/f"), Err(FsError::NotADirectory));
    assert!(fs.cwd().is_root());
  }

  #[test]
  fn cd_needs_read() {
    let mut fs = fs();
    fs.mkdir("/locked").unwrap();
    fs.chmod("3", "/locked").unwrap();
    assert_eq!(fs.cd("/locked"), Err(FsError::PermissionDenied));
    assert_eq!(fs.pwd().unwrap(), "/");
  }

  #[test]
  fn missing_write_blocks_mutations() {
    let mut fs = fs();
    fs.mkdir("/ro").unwrap();
    fs.create("/ro/f", ["x"]).unwrap();
    fs.create("/outside", ["y"]).unwrap();
    fs.chmod("5", "/ro").unwrap();
    fs.cd("/ro").unwrap();
    let before = fs.cwd().entries().clone();
    fs.cd("/").unwrap();

    assert_eq!(fs.create("/ro/g", ["z"]), Err(FsError::PermissionDenied));
    assert_eq!(fs.rm("/ro/f"), Err(FsError::PermissionDenied));
    assert_eq!(fs.mv("/ro/f", "/moved"), Err(FsError::PermissionDenied));
    assert_eq!(fs.mv("/outside", "/ro"), Err(FsError::PermissionDenied));
    assert_eq!(fs.mkdir("/ro/d"), Err(FsError::PermissionDenied));
    assert_eq!(fs.cp("/outside", "/ro/copy"), Err(FsError::PermissionDenied));

    fs.cd("/ro").unwrap();
    assert_eq!(fs.cwd().entries(), &before);
    assert_eq!(fs.cat("f").unwrap(), "x");
  }

  #[test]
  fn ls_needs_read() {
    let mut fs = fs();
    fs.chmod("3", "/").unwrap();
    assert_eq!(fs.ls(), Err(FsError::PermissionDenied));
    fs.chmod("7", "/").unwrap();
    assert!(fs.ls().unwrap().is_empty());
  }

  #[test]
  fn chmod_propagates_to_child_parent_links() {
    let mut fs = fs();
    fs.mkdir("/p").unwrap();
    fs.mkdir("/p/c1").unwrap();
    fs.mkdir("/p/c2").unwrap();
    fs.chmod("5", "/p").unwrap();
    for child in ["/p/c1", "/p/c2"] {
      let dir = crate::path::walk(&fs, &fs.cwd().dir_ref(), child).unwrap();
      let loaded = fs.load_dir(dir.block_id).unwrap();
      assert_eq!(loaded.parent().access_rights, AccessRights::READ | AccessRights::EXECUTE);
    }
    assert_eq!(fs.cwd().entries().find_entry("p").unwrap().access_rights.bits(), 5);
  }

  #[test]
  fn chmod_on_current_directory_updates_info() {
    let mut fs = fs();
    fs.mkdir("/p").unwrap();
    fs.mkdir("/p/c").unwrap();
    fs.cd("/p").unwrap();
    fs.chmod("4", ".").unwrap();
    assert_eq!(fs.cwd().rights(), AccessRights::READ);
    assert_eq!(fs.mkdir("d"), Err(FsError::PermissionDenied));
    fs.cd("c").unwrap();
    assert_eq!(fs.cwd().entries().parent().access_rights, AccessRights::READ);
    fs.cd("/").unwrap();
    assert_eq!(fs.cwd().entries().find_entry("p").unwrap().access_rights, AccessRights::READ);
  }

  #[test]
  fn chmod_rejects_bad_rights() {
    let mut fs = fs();
    fs.create("/f", ["x"]).unwrap();
    assert_eq!(fs.chmod("9", "/f"), Err(FsError::InvalidArgument));
    assert_eq!(fs.chmod("-1", "/f"), Err(FsError::InvalidArgument));
    assert_eq!(fs.chmod("6", "/nope"), Err(FsError::FileNotFound));
  }

  #[test]
  fn full_directory_and_full_disk() {
    let mut fs = fs();
    for i in 1..DIR_ENTRIES {
      fs.create(&format!("f{}", i), ["x"]).unwrap();
    }
    assert_eq!(fs.create("/one-more", ["x"]), Err(FsError::NoFreeDirectorySlot));

    let mut fs = self::fs();
    fs.mkdir("/d").unwrap();
    let huge = "h".repeat(BLOCK_SZ * (BLOCK_COUNT - 3));
    fs.create("/d/huge", [huge.as_str()]).unwrap();
    assert_eq!(fs.fat().free_count(), 0);
    assert_eq!(fs.create("/x", ["y"]), Err(FsError::NoFreeBlocks));
    assert_eq!(fs.mkdir("/e"), Err(FsError::NoFreeBlocks));
    assert_eq!(fs.cp("/d/huge", "/copy"), Err(FsError::NoFreeBlocks));
    fs.rm("/d/huge").unwrap();
    assert_eq!(fs.fat().free_count(), BLOCK_COUNT - 3);
  }

  #[test]
  fn walkthrough() {
    let mut fs = fs();
    fs.format().unwrap();
    fs.cd("/").unwrap();
    fs.create("/a.txt", ["hello", ""]).unwrap();
    assert_eq!(fs.cat("/a.txt").unwrap(), "hello");
    fs.mkdir("/sub").unwrap();
    fs.mv("/a.txt", "/sub/a.txt").unwrap();
    assert!(!names(&fs).contains(&String::from("a.txt")));
    fs.cd("/sub").unwrap();
    assert_eq!(names(&fs), ["a.txt"]);
  }
}
