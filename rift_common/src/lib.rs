pub mod config;
pub mod math;
pub mod net;
pub mod util;

use log::{Level, LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;
use std::io;

/// Installs the logger at info level. Might do more things in the future.
pub fn init(name: &str) { init_with_level(name, LevelFilter::Info) }

pub fn init_with_level(name: &str, level: LevelFilter) {
  init_with_level_writer(name, level, io::stdout());
}

pub fn init_with_writer(name: &str, writer: impl io::Write + Send + Sync + 'static) {
  init_with_level_writer(name, LevelFilter::Info, writer);
}

/// Installs a line logger writing to `writer`. `name` shows up in every
/// line, so logs from the server and its tooling can share a terminal.
pub fn init_with_level_writer<W: io::Write + Send + Sync + 'static>(
  name: &str,
  level: LevelFilter,
  writer: W,
) {
  let logger = LineLogger {
    name:   name.to_string(),
    out:    Mutex::new(writer),
    colors: stdout_is_tty(),
  };
  log::set_boxed_logger(Box::new(logger)).map(|()| log::set_max_level(level)).unwrap();
}

#[cfg(unix)]
fn stdout_is_tty() -> bool { unsafe { libc::isatty(libc::STDOUT_FILENO) != 0 } }
#[cfg(not(unix))]
fn stdout_is_tty() -> bool { false }

/// One log record per line: a time-of-day stamp, the padded level word, the
/// process name, the record's target, and the message. The whole line is
/// built up front and written in one call, so records from different
/// threads never interleave mid-line.
struct LineLogger<W> {
  name:   String,
  out:    Mutex<W>,
  colors: bool,
}

impl<W> LineLogger<W> {
  fn level_word(&self, level: Level) -> &'static str {
    if self.colors {
      match level {
        Level::Trace => "\x1b[35mtrace\x1b[0m",
        Level::Debug => "\x1b[36mdebug\x1b[0m",
        Level::Info => "\x1b[32m info\x1b[0m",
        Level::Warn => "\x1b[33m warn\x1b[0m",
        Level::Error => "\x1b[1;31merror\x1b[0m",
      }
    } else {
      match level {
        Level::Trace => "trace",
        Level::Debug => "debug",
        Level::Info => " info",
        Level::Warn => " warn",
        Level::Error => "error",
      }
    }
  }

  fn stamp() -> String {
    #[cfg(feature = "utclogs")]
    return chrono::Utc::now().format("%H:%M:%S%.3f").to_string();
    #[cfg(not(feature = "utclogs"))]
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
  }
}

impl<W: io::Write + Send + Sync> Log for LineLogger<W> {
  fn enabled(&self, _metadata: &Metadata) -> bool { true }

  fn log(&self, record: &Record) {
    if !self.enabled(record.metadata()) {
      return;
    }
    let line = format!(
      "{} {} {}/{}: {}\n",
      Self::stamp(),
      self.level_word(record.level()),
      self.name,
      record.target(),
      record.args(),
    );
    let _ = self.out.lock().write_all(line.as_bytes());
  }

  fn flush(&self) { let _ = self.out.lock().flush(); }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[derive(Clone, Default)]
  struct Capture(Arc<Mutex<Vec<u8>>>);

  impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
      self.0.lock().extend_from_slice(buf);
      Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> { Ok(()) }
  }

  #[test]
  fn lines_carry_name_level_and_target() {
    let capture = Capture::default();
    // The global logger can only be installed once per process, so this is
    // the only test that goes through the init path.
    init_with_level_writer("testsrv", LevelFilter::Debug, capture.clone());
    log::info!(target: "lobby", "waiting for {} players", 2);
    log::trace!(target: "lobby", "filtered out");

    let out = String::from_utf8(capture.0.lock().clone()).unwrap();
    let mut lines = out.lines();
    let line = lines.next().unwrap();
    // The level word may be wrapped in color escapes when stdout is a tty,
    // so the pieces are checked separately.
    assert!(line.contains("info"), "got: {line}");
    assert!(line.contains("testsrv/lobby: waiting for 2 players"), "got: {line}");
    assert_eq!(lines.next(), None, "trace is below the installed level");
  }
}
