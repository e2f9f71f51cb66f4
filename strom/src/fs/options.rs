use std::path::Path;

use super::FileStream;
use crate::{
  error::{Error, Result},
  io::buffer::{DEFAULT_BUFFER_SIZE, DEFAULT_SHADOW_LIMIT},
};

/// How the file is opened or created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileMode {
  /// Create a new file; fail if it exists.
  CreateNew,
  /// Create the file, truncating it if it exists.
  Create,
  /// Open an existing file.
  #[default]
  Open,
  /// Open the file, creating it if needed.
  OpenOrCreate,
  /// Open an existing file and truncate it to zero bytes.
  Truncate,
  /// Open or create the file and position at its end. Nothing before the
  /// original end can be overwritten through the stream.
  Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileAccess {
  #[default]
  Read,
  Write,
  ReadWrite,
}

impl FileAccess {
  pub fn can_read(self) -> bool {
    matches!(self, FileAccess::Read | FileAccess::ReadWrite)
  }

  pub fn can_write(self) -> bool {
    matches!(self, FileAccess::Write | FileAccess::ReadWrite)
  }
}

/// What other handles may do with the file while this one is open.
///
/// Expressed as an advisory `flock`: [`FileShare::None`] takes an exclusive
/// lock, everything else a shared one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileShare {
  None,
  #[default]
  Read,
  Write,
  ReadWrite,
}

/// Configuration for opening a [`FileStream`].
///
/// ```rust,no_run
/// use strom::fs::{FileAccess, FileMode, FileOptions};
///
/// let stream = FileOptions::new()
///   .mode(FileMode::OpenOrCreate)
///   .access(FileAccess::ReadWrite)
///   .buffer_size(16 * 1024)
///   .overlapped(true)
///   .open("data.bin")
///   .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct FileOptions {
  pub(crate) mode: FileMode,
  pub(crate) access: FileAccess,
  pub(crate) share: FileShare,
  pub(crate) buffer_size: usize,
  pub(crate) shadow_limit: usize,
  pub(crate) overlapped: bool,
  pub(crate) permissions: u32,
  pub(crate) leave_open: bool,
}

impl Default for FileOptions {
  fn default() -> Self {
    Self {
      mode: FileMode::Open,
      access: FileAccess::Read,
      share: FileShare::Read,
      buffer_size: DEFAULT_BUFFER_SIZE,
      shadow_limit: DEFAULT_SHADOW_LIMIT,
      overlapped: false,
      permissions: 0o666,
      leave_open: false,
    }
  }
}

impl FileOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn mode(mut self, mode: FileMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn access(mut self, access: FileAccess) -> Self {
    self.access = access;
    self
  }

  pub fn share(mut self, share: FileShare) -> Self {
    self.share = share;
    self
  }

  pub fn buffer_size(mut self, size: usize) -> Self {
    self.buffer_size = size;
    self
  }

  pub fn shadow_limit(mut self, limit: usize) -> Self {
    self.shadow_limit = limit;
    self
  }

  /// Ask for kernel-asynchronous I/O. Granted only for regular files when
  /// io_uring is available; see [`FileStream::is_overlapped`].
  pub fn overlapped(mut self, overlapped: bool) -> Self {
    self.overlapped = overlapped;
    self
  }

  /// Permission bits for newly created files, before the umask.
  pub fn permissions(mut self, mode: u32) -> Self {
    self.permissions = mode;
    self
  }

  /// Do not close the descriptor when the stream closes. Only meaningful for
  /// [`FileStream::from_raw_fd`].
  pub fn leave_open(mut self, leave_open: bool) -> Self {
    self.leave_open = leave_open;
    self
  }

  pub fn open(&self, path: impl AsRef<Path>) -> Result<FileStream> {
    FileStream::open_with(path.as_ref(), self)
  }

  pub(crate) fn validate(&self) -> Result<()> {
    if self.buffer_size == 0 {
      return Err(Error::argument("buffer_size", "must be positive"));
    }
    match (self.mode, self.access) {
      (FileMode::Append, FileAccess::Write) => Ok(()),
      (FileMode::Append, _) => {
        Err(Error::argument("mode", "append requires write-only access"))
      }
      (
        FileMode::Create | FileMode::CreateNew | FileMode::Truncate,
        FileAccess::Read,
      ) => Err(Error::argument("mode", "mode requires write access")),
      _ => Ok(()),
    }
  }

  pub(crate) fn open_flags(&self) -> libc::c_int {
    let access = match self.access {
      FileAccess::Read => libc::O_RDONLY,
      FileAccess::Write => libc::O_WRONLY,
      FileAccess::ReadWrite => libc::O_RDWR,
    };
    let creation = match self.mode {
      FileMode::CreateNew => libc::O_CREAT | libc::O_EXCL,
      FileMode::Create => libc::O_CREAT | libc::O_TRUNC,
      FileMode::Open => 0,
      FileMode::OpenOrCreate | FileMode::Append => libc::O_CREAT,
      FileMode::Truncate => libc::O_TRUNC,
    };
    access | creation | libc::O_CLOEXEC
  }
}
