use std::io::Write;

use log::{Level, LevelFilter, Log, Metadata, Record};
use owo_colors::{AnsiColors, OwoColorize};

/// Writes level-colored lines to stderr
struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
  fn enabled(&self, metadata: &Metadata) -> bool {
    metadata.level() <= log::max_level()
  }

  fn log(&self, record: &Record) {
    if !self.enabled(record.metadata()) {
      return;
    }
    let level = record.level();
    let color = match level {
      Level::Error => AnsiColors::BrightRed,
      Level::Warn => AnsiColors::BrightYellow,
      Level::Info => AnsiColors::BrightBlue,
      Level::Debug => AnsiColors::BrightCyan,
      Level::Trace => AnsiColors::BrightMagenta,
    };
    let tag = format!("{level:5}");
    let _ = writeln!(
      std::io::stderr().lock(),
      "{} [{}] {}",
      tag.color(color),
      record.target().dimmed(),
      record.args()
    );
  }

  fn flush(&self) {
    let _ = std::io::stderr().flush();
  }
}

/// Install the logger. `verbosity` counts `-v` flags: warnings by default,
/// then info, debug and trace.
pub fn init(verbosity: u64) -> Result<(), log::SetLoggerError> {
  let level = match verbosity {
    0 => LevelFilter::Warn,
    1 => LevelFilter::Info,
    2 => LevelFilter::Debug,
    _ => LevelFilter::Trace,
  };
  log::set_logger(&LOGGER)?;
  log::set_max_level(level);
  Ok(())
}
