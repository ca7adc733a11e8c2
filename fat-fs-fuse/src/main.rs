use clap::{App, Arg};
use fat_fs::{BlockDevice, BlockDeviceError, FileSystem, FsError, BLOCK_COUNT, BLOCK_SZ};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

mod logger;
mod shell;

use shell::Shell;

const DEFAULT_IMAGE: &str = "diskfile.bin";
const IMAGE_SIZE: u64 = (BLOCK_SZ * BLOCK_COUNT) as u64;

/// A disk image file used as a block device
struct BlockFile(Mutex<File>);

impl BlockFile {
  fn seek_to(file: &mut File, block_id: usize, buf_len: usize) -> Result<(), BlockDeviceError> {
    if block_id >= BLOCK_COUNT {
      return Err(BlockDeviceError::OutOfRange(block_id));
    }
    if buf_len != BLOCK_SZ {
      return Err(BlockDeviceError::BadBuffer(buf_len));
    }
    file.seek(SeekFrom::Start((block_id * BLOCK_SZ) as u64))
      .map(|_| ())
      .map_err(|err| io_error(block_id, err))
  }
}

fn io_error(block_id: usize, err: io::Error) -> BlockDeviceError {
  log::error!("image: block {}: {}", block_id, err);
  BlockDeviceError::Io(block_id)
}

impl BlockDevice for BlockFile {
  fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), BlockDeviceError> {
    let mut file = self.0.lock().map_err(|_| BlockDeviceError::Io(block_id))?;
    Self::seek_to(&mut file, block_id, buf.len())?;
    file.read_exact(buf).map_err(|err| io_error(block_id, err))
  }

  fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), BlockDeviceError> {
    let mut file = self.0.lock().map_err(|_| BlockDeviceError::Io(block_id))?;
    Self::seek_to(&mut file, block_id, buf.len())?;
    file.write_all(buf).map_err(|err| io_error(block_id, err))
  }
}

fn fs_error(err: FsError) -> io::Error {
  io::Error::other(err)
}

/// Open the image at `path`, creating it when missing. Returns whether the
/// file is new.
fn open_image(path: &Path) -> io::Result<(File, bool)> {
  let fresh = !path.exists();
  let file = OpenOptions::new()
    .read(true)
    .write(true)
    .create(true)
    .truncate(false)
    .open(path)?;
  if file.metadata()?.len() < IMAGE_SIZE {
    file.set_len(IMAGE_SIZE)?;
  }
  Ok((file, fresh))
}

/// Mount the image at `path`, formatting it when it is new or `format` is set
fn mount(path: &Path, format: bool) -> io::Result<FileSystem> {
  let (file, fresh) = open_image(path)?;
  let dev: Arc<dyn BlockDevice> = Arc::new(BlockFile(Mutex::new(file)));
  if fresh || format {
    log::info!("formatting {}", path.display());
    FileSystem::format_device(dev).map_err(fs_error)
  } else {
    FileSystem::open(dev).map_err(fs_error)
  }
}

pub fn main() -> io::Result<()> {
  let matches = App::new("fat-fs shell")
    .about("Shell over a FAT disk image")
    .arg(
      Arg::with_name("image")
        .short("i")
        .long("image")
        .takes_value(true)
        .default_value(DEFAULT_IMAGE)
        .help("Disk image file, created and formatted when missing")
    )
    .arg(
      Arg::with_name("format")
        .short("f")
        .long("format")
        .help("Format the image before starting")
    )
    .arg(
      Arg::with_name("verbose")
        .short("v")
        .long("verbose")
        .multiple(true)
        .help("Log more, repeat for more detail")
    ).get_matches();

  logger::init(matches.occurrences_of("verbose")).map_err(io::Error::other)?;
  let image = matches.value_of("image").unwrap_or(DEFAULT_IMAGE);
  let fs = mount(Path::new(image), matches.is_present("format"))?;
  if !fs.is_formatted() {
    println!("{} holds no filesystem, run `format` first", image);
  }

  let stdin = io::stdin();
  Shell::new(fs, stdin.lock(), io::stdout()).run(true)
}

#[cfg(test)]
fn test_image(name: &str) -> io::Result<std::path::PathBuf> {
  std::fs::create_dir_all("target")?;
  let path = Path::new("target").join(name);
  if path.exists() {
    std::fs::remove_file(&path)?;
  }
  Ok(path)
}

#[test]
fn fat_fs_test() -> io::Result<()> {
  let image = test_image("fat-fs.img")?;
  let mut fs = mount(&image, false)?;
  assert!(fs.is_formatted());
  assert_eq!(std::fs::metadata(&image)?.len(), IMAGE_SIZE);

  fs.create("filea", [""]).map_err(fs_error)?;
  fs.create("fileb", [""]).map_err(fs_error)?;
  for entry in fs.ls().map_err(fs_error)? {
    println!("{}", entry);
  }
  let greet_str = "Hello, world!";
  fs.rm("filea").map_err(fs_error)?;
  fs.create("filea", [greet_str]).map_err(fs_error)?;
  assert_eq!(fs.cat("filea").map_err(fs_error)?, greet_str);

  let free = fs.fat().free_count();
  let mut random_str_test = |len: usize| {
    fs.rm("filea").unwrap();
    assert_eq!(fs.cat("filea"), Err(FsError::FileNotFound), "not removed!");
    let mut str = String::new();

    // random digit
    for _ in 0..len {
      str.push(char::from(b'0' + rand::random::<u8>() % 10));
    }
    fs.create("filea", [str.as_str()]).unwrap();
    assert_eq!(fs.cat("filea").unwrap(), str);
    assert_eq!(fs.fat().free_count() + len.div_ceil(BLOCK_SZ), free + 1);
  };

  println!("phase 1:");
  random_str_test(4 * BLOCK_SZ);
  random_str_test(8 * BLOCK_SZ + BLOCK_SZ / 2);
  println!("phase 2:");
  random_str_test(100 * BLOCK_SZ);
  random_str_test(70 * BLOCK_SZ + BLOCK_SZ / 7);
  random_str_test((12 + 128) * BLOCK_SZ);
  println!("phase 3:");
  random_str_test(400 * BLOCK_SZ);
  random_str_test(1000 * BLOCK_SZ);
  random_str_test(2000 * BLOCK_SZ);

  Ok(())
}

#[test]
fn image_survives_remount() -> io::Result<()> {
  let image = test_image("fat-fs-remount.img")?;
  {
    let mut fs = mount(&image, false)?;
    fs.mkdir("/docs").map_err(fs_error)?;
    fs.create("/docs/note", ["first", "second"]).map_err(fs_error)?;
    fs.cd("/docs").map_err(fs_error)?;
    fs.chmod("4", "note").map_err(fs_error)?;
  }
  let mut fs = mount(&image, false)?;
  assert_eq!(fs.pwd().map_err(fs_error)?, "/");
  assert_eq!(fs.cat("/docs/note").map_err(fs_error)?, "first\nsecond");
  assert_eq!(fs.append("/docs/note", "/docs/note"), Err(FsError::PermissionDenied));
  drop(fs);

  let fs = mount(&image, true)?;
  assert!(fs.ls().map_err(fs_error)?.is_empty());
  Ok(())
}
