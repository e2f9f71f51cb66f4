use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Result type for operations that hand a buffer back to the caller whether
/// they succeeded or not.
pub type BufResult<T, B> = (Result<T>, B);

#[derive(Debug, Error)]
pub enum Error {
  /// Bad offset, count, origin arithmetic or configuration value. Always
  /// reported before any I/O is attempted.
  #[error("invalid argument `{name}`: {reason}")]
  ArgumentInvalid { name: &'static str, reason: &'static str },

  /// The stream lacks the capability the call needs.
  #[error("unsupported operation: {0}")]
  UnsupportedOperation(&'static str),

  #[error("cannot access a closed stream")]
  StreamClosed,

  #[error("{}", io_message(.source, .path))]
  Io {
    #[source]
    source: io::Error,
    path: Option<PathBuf>,
  },

  /// The OS handle's cursor moved while the handle was exposed. Buffered
  /// data has been discarded.
  #[error(
    "handle position changed underneath the stream (expected {expected}, found {actual})"
  )]
  StateCorruption { expected: u64, actual: u64 },

  #[error("operation was cancelled")]
  Cancelled,

  #[error("cannot move before the append boundary at offset {boundary}")]
  AppendViolation { boundary: u64 },

  /// Misuse of the begin/end calling pattern.
  #[error("invalid state: {0}")]
  InvalidState(&'static str),
}

fn io_message(source: &io::Error, path: &Option<PathBuf>) -> String {
  match path {
    Some(path) => format!("i/o error on '{}': {source}", path.display()),
    None => format!("i/o error: {source}"),
  }
}

impl Error {
  pub(crate) fn argument(name: &'static str, reason: &'static str) -> Self {
    Error::ArgumentInvalid { name, reason }
  }

  pub(crate) fn io_at(source: io::Error, path: Option<PathBuf>) -> Self {
    if ECANCELED.is_some() && source.raw_os_error() == ECANCELED {
      return Error::Cancelled;
    }
    Error::Io { source, path }
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, Error::Cancelled)
  }

  /// The OS error code behind an [`Error::Io`], if there is one.
  pub fn raw_os_error(&self) -> Option<i32> {
    match self {
      Error::Io { source, .. } => source.raw_os_error(),
      _ => None,
    }
  }
}

#[cfg(all(unix, feature = "fs"))]
const ECANCELED: Option<i32> = Some(libc::ECANCELED);
#[cfg(not(all(unix, feature = "fs")))]
const ECANCELED: Option<i32> = None;

impl From<io::Error> for Error {
  fn from(source: io::Error) -> Self {
    Error::io_at(source, None)
  }
}

impl From<Error> for io::Error {
  fn from(err: Error) -> Self {
    let kind = match &err {
      Error::Io { source, .. } => source.kind(),
      Error::ArgumentInvalid { .. } => io::ErrorKind::InvalidInput,
      Error::UnsupportedOperation(_) => io::ErrorKind::Unsupported,
      Error::StreamClosed => io::ErrorKind::BrokenPipe,
      Error::Cancelled => io::ErrorKind::Interrupted,
      Error::StateCorruption { .. }
      | Error::AppendViolation { .. }
      | Error::InvalidState(_) => io::ErrorKind::Other,
    };
    match err {
      Error::Io { source, path: None } => source,
      other => io::Error::new(kind, other),
    }
  }
}

#[cfg(all(unix, feature = "fs"))]
#[test]
fn cancelled_errno_maps_to_cancelled() {
  let err = Error::from(io::Error::from_raw_os_error(libc::ECANCELED));
  assert!(err.is_cancelled());

  let other = Error::from(io::Error::from_raw_os_error(libc::EIO));
  assert!(!other.is_cancelled());
  assert_eq!(other.raw_os_error(), Some(libc::EIO));
}

#[test]
fn io_error_keeps_path_in_message() {
  let err = Error::io_at(
    io::Error::from(io::ErrorKind::NotFound),
    Some(PathBuf::from("/nope")),
  );
  assert!(err.to_string().contains("/nope"));
  assert!(matches!(err, Error::Io { .. }));
}
