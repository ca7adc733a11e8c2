//! Line-oriented command shell over a mounted filesystem
use std::io::{self, BufRead, Write};

use fat_fs::{FileSystem, FsError, FsResult};

/// name, arguments, summary
static COMMANDS: &[(&str, &str, &str)] = &[
  ("format", "", "erase the disk and create an empty filesystem"),
  ("create", "<path>", "create a file from the following lines, ended by an empty line"),
  ("cat", "<path>", "print a file"),
  ("ls", "", "list the current directory"),
  ("cp", "<src> <dst>", "copy a file"),
  ("mv", "<src> <dst>", "rename or move a file or directory"),
  ("rm", "<path>", "delete a file"),
  ("append", "<src> <dst>", "append src to the end of dst"),
  ("mkdir", "<path>", "create a directory"),
  ("cd", "<path>", "change the current directory"),
  ("pwd", "", "print the current directory"),
  ("chmod", "<rights> <path>", "set rights, 0 to 7 (read 4, write 2, execute 1)"),
  ("help", "", "show this list"),
  ("quit", "", "sync and leave, also `exit`"),
];

/// Outcome of one input line
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
  Continue,
  Quit,
}

pub struct Shell<R, W> {
  fs: FileSystem,
  input: R,
  out: W,
}

impl<R: BufRead, W: Write> Shell<R, W> {
  pub fn new(fs: FileSystem, input: R, out: W) -> Self {
    Self { fs, input, out }
  }

  /// Read commands until `quit` or end of input, then sync the filesystem
  pub fn run(&mut self, prompt: bool) -> io::Result<()> {
    let mut line = String::new();
    loop {
      if prompt {
        write!(self.out, "> ")?;
        self.out.flush()?;
      }
      line.clear();
      if self.input.read_line(&mut line)? == 0 {
        break;
      }
      if self.execute(line.trim())? == Flow::Quit {
        break;
      }
    }
    if let Err(err) = self.fs.sync() {
      writeln!(self.out, "sync: {}", err)?;
    }
    Ok(())
  }

  /// Run one command line. Filesystem errors are reported as
  /// `<command>: <message>`, only output failures are returned.
  pub fn execute(&mut self, line: &str) -> io::Result<Flow> {
    let args: Vec<&str> = line.split_whitespace().collect();
    let Some((&cmd, args)) = args.split_first() else {
      return Ok(Flow::Continue);
    };
    log::debug!("shell: {} {:?}", cmd, args);
    let res = match (cmd, args) {
      ("quit" | "exit", []) => return Ok(Flow::Quit),
      ("help", []) => {
        self.help()?;
        Ok(())
      }
      ("format", []) => self.fs.format(),
      ("create", [path]) => {
        let lines = self.read_content()?;
        self.fs.create(path, &lines)
      }
      ("cat", [path]) => match self.fs.cat(path) {
        Ok(text) => {
          writeln!(self.out, "{}", text)?;
          Ok(())
        }
        Err(err) => Err(err),
      },
      ("ls", []) => match self.fs.ls() {
        Ok(listing) => {
          for entry in listing {
            writeln!(self.out, "{}", entry)?;
          }
          Ok(())
        }
        Err(err) => Err(err),
      },
      ("cp", [src, dst]) => self.fs.cp(src, dst),
      ("mv", [src, dst]) => self.fs.mv(src, dst),
      ("rm", [path]) => self.fs.rm(path),
      ("append", [src, dst]) => self.fs.append(src, dst),
      ("mkdir", [path]) => self.fs.mkdir(path),
      ("cd", [path]) => self.fs.cd(path),
      ("pwd", []) => match self.fs.pwd() {
        Ok(path) => {
          writeln!(self.out, "{}", path)?;
          Ok(())
        }
        Err(err) => Err(err),
      },
      ("chmod", [rights, path]) => self.fs.chmod(rights, path),
      _ => self.usage(cmd)?,
    };
    if let Err(err) = res {
      writeln!(self.out, "{}: {}", cmd, err)?;
    }
    Ok(Flow::Continue)
  }

  /// Content lines of `create`, up to and including the blank line ending them
  fn read_content(&mut self) -> io::Result<Vec<String>> {
    let mut lines = Vec::new();
    loop {
      let mut line = String::new();
      if self.input.read_line(&mut line)? == 0 {
        break;
      }
      let line = line.trim_end_matches(['\r', '\n']).to_string();
      let last = line.is_empty();
      lines.push(line);
      if last {
        break;
      }
    }
    Ok(lines)
  }

  fn help(&mut self) -> io::Result<()> {
    for (name, args, summary) in COMMANDS {
      writeln!(self.out, "{:<24}{}", format!("{} {}", name, args), summary)?;
    }
    Ok(())
  }

  /// Report a known command called with the wrong arguments, or an unknown one
  fn usage(&mut self, cmd: &str) -> io::Result<FsResult<()>> {
    match COMMANDS.iter().find(|(name, ..)| *name == cmd) {
      Some((name, args, _)) => {
        writeln!(self.out, "usage: {} {}", name, args)?;
        Ok(Err(FsError::InvalidArgument))
      }
      None => {
        writeln!(self.out, "{}: unknown command, type `help` for the list", cmd)?;
        Ok(Ok(()))
      }
    }
  }
}
