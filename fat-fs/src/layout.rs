//! Layout of directory blocks
use core::fmt::{self, Debug, Display, Formatter};

use alloc::boxed::Box;
use bitflags::bitflags;

use crate::{
  BLOCK_SZ, DataBlock,
  error::{FsError, FsResult},
};

/// size of a directory entry
pub const DIRENT_SZ: usize = 64;
/// entries held by one directory block
pub const DIR_ENTRIES: usize = BLOCK_SZ / DIRENT_SZ;
/// visible bytes of a name, one more byte holds the terminator
pub const NAME_LENGTH_LIMIT: usize = 55;

const NAME_FIELD: usize = NAME_LENGTH_LIMIT + 1;
const SIZE_OFFSET: usize = 56;
const FIRST_BLOCK_OFFSET: usize = 60;
const KIND_OFFSET: usize = 62;
const RIGHTS_OFFSET: usize = 63;

bitflags! {
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
  pub struct AccessRights: u8 {
    const READ = 0x04;
    const WRITE = 0x02;
    const EXECUTE = 0x01;
  }
}

impl AccessRights {
  pub const READ_WRITE: Self = Self::READ.union(Self::WRITE);
  pub const WRITE_EXECUTE: Self = Self::WRITE.union(Self::EXECUTE);

  /// Parse a `chmod` argument: a decimal value within the three rights bits
  pub fn parse(s: &str) -> FsResult<Self> {
    let raw: u8 = s.trim().parse().map_err(|_| FsError::InvalidArgument)?;
    Self::from_bits(raw).ok_or(FsError::InvalidArgument)
  }
}

impl Display for AccessRights {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    let bit = |flag: Self, c: char| if self.contains(flag) { c } else { '-' };
    write!(f, "{}{}{}", bit(Self::READ, 'r'), bit(Self::WRITE, 'w'), bit(Self::EXECUTE, 'x'))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryKind {
  #[default]
  File,
  Directory,
}

impl EntryKind {
  fn from_raw(raw: u8) -> Self {
    match raw {
      1 => EntryKind::Directory,
      _ => EntryKind::File,
    }
  }

  fn to_raw(self) -> u8 {
    match self {
      EntryKind::File => 0,
      EntryKind::Directory => 1,
    }
  }
}

/// A name of at most `NAME_LENGTH_LIMIT` bytes.
///
/// Longer input is cut at the last char boundary that fits. Two names are
/// equal only if they have the same length and bytes, there is no prefix
/// matching.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct EntryName(heapless::String<NAME_LENGTH_LIMIT>);

impl EntryName {
  pub fn new(name: &str) -> Self {
    let mut s = heapless::String::new();
    for c in name.chars() {
      if s.push(c).is_err() {
        break;
      }
    }
    Self(s)
  }

  pub fn as_str(&self) -> &str {
    self.0.as_str()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  fn from_field(raw: &[u8]) -> Self {
    let len = raw.iter().position(|b| *b == 0).unwrap_or(raw.len()).min(NAME_LENGTH_LIMIT);
    match core::str::from_utf8(&raw[..len]) {
      Ok(name) => Self::new(name),
      Err(e) => Self::new(core::str::from_utf8(&raw[..e.valid_up_to()]).unwrap_or_default()),
    }
  }
}

impl Debug for EntryName {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    Debug::fmt(self.as_str(), f)
  }
}

impl Display for EntryName {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl PartialEq<str> for EntryName {
  fn eq(&self, other: &str) -> bool {
    self.as_str() == other
  }
}

/// One 64-byte record of a directory block
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirEntry {
  pub name: EntryName,
  /// byte count, files only
  pub size: u32,
  /// 0 marks an empty slot, except in the reserved slot 0
  pub first_block: u16,
  pub kind: EntryKind,
  pub access_rights: AccessRights,
}

impl DirEntry {
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn new(name: &str, size: u32, first_block: u16, kind: EntryKind, access_rights: AccessRights) -> Self {
    Self {
      name: EntryName::new(name),
      size,
      first_block,
      kind,
      access_rights,
    }
  }

  /// The ".." link stored in slot 0
  pub fn parent_link(parent_block: u16, parent_access_rights: AccessRights) -> Self {
    Self::new("..", 0, parent_block, EntryKind::Directory, parent_access_rights)
  }

  /// A free slot: no first block and not a directory. The root's ".." link
  /// points at block 0 too, its kind keeps it from reading as empty.
  pub fn is_empty(&self) -> bool {
    self.first_block == 0 && self.kind == EntryKind::File
  }

  pub fn is_dir(&self) -> bool {
    self.kind == EntryKind::Directory
  }

  pub fn is_file(&self) -> bool {
    self.kind == EntryKind::File
  }

  fn decode(raw: &[u8]) -> Self {
    Self {
      name: EntryName::from_field(&raw[..NAME_FIELD]),
      size: u32::from_le_bytes([raw[SIZE_OFFSET], raw[SIZE_OFFSET + 1], raw[SIZE_OFFSET + 2], raw[SIZE_OFFSET + 3]]),
      first_block: u16::from_le_bytes([raw[FIRST_BLOCK_OFFSET], raw[FIRST_BLOCK_OFFSET + 1]]),
      kind: EntryKind::from_raw(raw[KIND_OFFSET]),
      access_rights: AccessRights::from_bits_truncate(raw[RIGHTS_OFFSET]),
    }
  }

  fn encode(&self, raw: &mut [u8]) {
    raw.fill(0);
    let name = self.name.as_str().as_bytes();
    raw[..name.len()].copy_from_slice(name);
    raw[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&self.size.to_le_bytes());
    raw[FIRST_BLOCK_OFFSET..FIRST_BLOCK_OFFSET + 2].copy_from_slice(&self.first_block.to_le_bytes());
    raw[KIND_OFFSET] = self.kind.to_raw();
    raw[RIGHTS_OFFSET] = self.access_rights.bits();
  }
}

/// The entry array of one directory block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
  entries: Box<[DirEntry]>,
}

impl Directory {
  /// A directory whose slot 0 links to `parent_block`, everything else empty
  pub fn init(parent_block: u16, parent_access_rights: AccessRights) -> Self {
    let mut entries: Box<[DirEntry]> = (0..DIR_ENTRIES).map(|_| DirEntry::empty()).collect();
    entries[0] = DirEntry::parent_link(parent_block, parent_access_rights);
    Self { entries }
  }

  pub fn decode(blk: &DataBlock) -> Self {
    Self {
      entries: blk.chunks_exact(DIRENT_SZ).map(DirEntry::decode).collect(),
    }
  }

  pub fn encode(&self) -> DataBlock {
    let mut blk: DataBlock = [0; BLOCK_SZ];
    blk.chunks_exact_mut(DIRENT_SZ)
      .zip(self.entries.iter())
      .for_each(|(raw, entry)| entry.encode(raw));
    blk
  }

  /// The ".." link
  pub fn parent(&self) -> &DirEntry {
    &self.entries[0]
  }

  pub fn parent_mut(&mut self) -> &mut DirEntry {
    &mut self.entries[0]
  }

  pub fn entry(&self, idx: usize) -> &DirEntry {
    &self.entries[idx]
  }

  pub fn entry_mut(&mut self, idx: usize) -> &mut DirEntry {
    &mut self.entries[idx]
  }

  /// Occupied slots after the ".." link, with their index
  pub fn occupied(&self) -> impl Iterator<Item = (usize, &DirEntry)> {
    self.entries.iter().enumerate().skip(1).filter(|(_, e)| !e.is_empty())
  }

  /// Index of the entry named `name`, compared after the same truncation
  /// the name got when it was stored
  pub fn position(&self, name: &str) -> FsResult<usize> {
    let name = EntryName::new(name);
    self.occupied()
      .find(|(_, e)| e.name == name)
      .map(|(idx, _)| idx)
      .ok_or(FsError::FileNotFound)
  }

  pub fn find_entry(&self, name: &str) -> FsResult<&DirEntry> {
    self.position(name).map(|idx| &self.entries[idx])
  }

  /// Entry of the subdirectory stored at `block_id`
  pub fn find_child_dir(&self, block_id: u16) -> Option<(usize, &DirEntry)> {
    self.occupied().find(|(_, e)| e.is_dir() && e.first_block == block_id)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.position(name).is_ok()
  }

  pub fn find_empty_slot(&self) -> FsResult<usize> {
    self.entries.iter()
      .skip(1)
      .position(|e| e.first_block == 0)
      .map(|idx| idx + 1)
      .ok_or(FsError::NoFreeDirectorySlot)
  }

  /// Place `entry` in the first empty slot, returns the slot index
  pub fn insert(&mut self, entry: DirEntry) -> FsResult<usize> {
    let idx = self.find_empty_slot()?;
    self.entries[idx] = entry;
    Ok(idx)
  }

  pub fn clear(&mut self, idx: usize) {
    self.entries[idx] = DirEntry::empty();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use alloc::string::ToString;

  #[test]
  fn entry_fits_64_bytes() {
    let entry = DirEntry::new("notes.txt", 1234, 17, EntryKind::File, AccessRights::READ_WRITE);
    let mut raw = [0u8; DIRENT_SZ];
    entry.encode(&mut raw);
    assert_eq!(&raw[..9], b"notes.txt");
    assert_eq!(raw[9], 0);
    assert_eq!(raw[FIRST_BLOCK_OFFSET], 17);
    assert_eq!(raw[RIGHTS_OFFSET], 0x06);
    assert_eq!(DirEntry::decode(&raw), entry);
  }

  #[test]
  fn names_are_truncated_not_rejected() {
    let long = "x".repeat(80);
    let name = EntryName::new(&long);
    assert_eq!(name.as_str().len(), NAME_LENGTH_LIMIT);
    // multi-byte chars are never split
    let wide = "é".repeat(40);
    let name = EntryName::new(&wide);
    assert_eq!(name.as_str().len(), 54);
  }

  #[test]
  fn names_compare_by_exact_length() {
    let name = EntryName::new("abc");
    assert!(name == *"abc");
    assert!(name != *"ab");
    assert!(name != *"abcd");
  }

  #[test]
  fn init_reserves_parent_link() {
    let dir = Directory::init(9, AccessRights::all());
    assert_eq!(dir.parent().first_block, 9);
    assert!(dir.parent().is_dir());
    assert_eq!(dir.occupied().count(), 0);
    assert_eq!(dir.find_empty_slot(), Ok(1));
  }

  #[test]
  fn root_parent_link_is_not_empty() {
    let root = Directory::init(0, AccessRights::all());
    assert!(!root.parent().is_empty());
    assert!(root.entry(1).is_empty());
  }

  #[test]
  fn directory_codec_keeps_entries() {
    let mut dir = Directory::init(0, AccessRights::all());
    dir.insert(DirEntry::new("a", 5, 2, EntryKind::File, AccessRights::READ)).unwrap();
    dir.insert(DirEntry::new("sub", 0, 3, EntryKind::Directory, AccessRights::all())).unwrap();
    let decoded = Directory::decode(&dir.encode());
    assert_eq!(decoded, dir);
    assert_eq!(decoded.find_entry("sub").unwrap().first_block, 3);
    assert_eq!(decoded.find_entry("b"), Err(FsError::FileNotFound));
  }

  #[test]
  fn full_directory_reports_no_slot() {
    let mut dir = Directory::init(0, AccessRights::all());
    for i in 1..DIR_ENTRIES {
      let name = alloc::format!("f{}", i);
      dir.insert(DirEntry::new(&name, 0, 100 + i as u16, EntryKind::File, AccessRights::READ)).unwrap();
    }
    assert_eq!(dir.find_empty_slot(), Err(FsError::NoFreeDirectorySlot));
  }

  #[test]
  fn rights_parse_and_render() {
    assert_eq!(AccessRights::parse("7"), Ok(AccessRights::all()));
    assert_eq!(AccessRights::parse("6").unwrap().to_string(), "rw-");
    assert_eq!(AccessRights::parse("0").unwrap().to_string(), "---");
    assert_eq!(AccessRights::parse("8"), Err(FsError::InvalidArgument));
    assert_eq!(AccessRights::parse("rw"), Err(FsError::InvalidArgument));
  }
}
