//! Path splitting and directory walks
use crate::{
  ROOT_BLOCK,
  error::{FsError, FsResult},
  layout::{AccessRights, DirEntry, Directory, EntryKind},
};

/// Source of directory contents for a walk
pub trait DirLoader {
  /// Current contents of the directory stored at `block_id`
  fn load_dir(&self, block_id: u16) -> FsResult<Directory>;

  /// Rights currently attached to the root directory
  fn root_rights(&self) -> AccessRights;

  fn root_ref(&self) -> DirRef {
    DirRef::root(self.root_rights())
  }
}

/// A located directory: its block and the entry describing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirRef {
  pub block_id: u16,
  /// seen from the parent, its rights are the directory's own rights
  pub info: DirEntry,
}

impl DirRef {
  pub fn root(access_rights: AccessRights) -> Self {
    Self {
      block_id: ROOT_BLOCK,
      info: DirEntry::new("/", 0, ROOT_BLOCK, EntryKind::Directory, access_rights),
    }
  }

  pub fn rights(&self) -> AccessRights {
    self.info.access_rights
  }
}

/// Split `path` at its last `/` into the directory part and the trailing name.
///
/// `"/a/b"` gives `("/a", "b")`, `"/b"` gives `("/", "b")` and a bare `"b"`
/// gives `("", "b")`.
pub fn split_path(path: &str) -> (&str, &str) {
  match path.rfind('/') {
    Some(0) => ("/", &path[1..]),
    Some(idx) => (&path[..idx], &path[idx + 1..]),
    None => ("", path),
  }
}

/// Walk `path` starting from `origin`, or from the root when the path is
/// absolute. Empty components and `.` stay put, `..` follows the parent link.
pub fn walk<L: DirLoader + ?Sized>(loader: &L, origin: &DirRef, path: &str) -> FsResult<DirRef> {
  let mut cur = if path.starts_with('/') {
    loader.root_ref()
  } else {
    origin.clone()
  };
  for component in path.split('/') {
    cur = match component {
      "" | "." => continue,
      ".." => {
        let parent = loader.load_dir(cur.block_id)?.parent().clone();
        if parent.first_block == ROOT_BLOCK {
          loader.root_ref()
        } else {
          DirRef {
            block_id: parent.first_block,
            info: parent,
          }
        }
      }
      name => {
        let dir = loader.load_dir(cur.block_id)?;
        let entry = dir.find_entry(name).map_err(|_| FsError::PathNotFound)?;
        if !entry.is_dir() {
          return Err(FsError::NotADirectory);
        }
        DirRef {
          block_id: entry.first_block,
          info: entry.clone(),
        }
      }
    };
  }
  log::debug!("walk {:?}: block {}", path, cur.block_id);
  Ok(cur)
}

/// Turn `path` into the trailing file name and the directory holding it.
///
/// A path that walks to an existing directory is that directory with an empty
/// file name, so `mv a sub` and `cd sub` split the same way.
pub fn resolve<'p, L: DirLoader + ?Sized>(
  loader: &L,
  origin: &DirRef,
  path: &'p str,
) -> FsResult<(&'p str, DirRef)> {
  match walk(loader, origin, path) {
    Ok(dir) => return Ok(("", dir)),
    Err(FsError::PathNotFound | FsError::NotADirectory) => {}
    Err(err) => return Err(err),
  }
  let (dir_path, name) = split_path(path);
  let dir = walk(loader, origin, dir_path)?;
  Ok((name, dir))
}
