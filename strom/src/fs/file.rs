use std::{
  os::fd::{BorrowedFd, FromRawFd, OwnedFd, RawFd},
  path::Path,
};

#[cfg(all(target_os = "linux", feature = "uring"))]
use super::driver::Driver;
use super::{
  handle::FileHandle,
  options::{FileAccess, FileMode, FileOptions},
};
use crate::{
  error::{Error, Result},
  io::{
    offset_position, BufferedStream, BufferedStreamBuilder, Overlapped, SeekOrigin,
    Stream,
  },
};

/// The kernel side of a file stream: the handle and the offset the next
/// read or write goes to.
#[derive(Debug)]
pub(crate) struct RawFile {
  pub(crate) handle: FileHandle,
  access: FileAccess,
  seekable: bool,
  pub(crate) pos: u64,
}

impl RawFile {
  fn ensure_seekable(&self) -> Result<()> {
    self.handle.check()?;
    if !self.seekable {
      return Err(Error::UnsupportedOperation("file does not support seeking"));
    }
    Ok(())
  }
}

impl Stream for RawFile {
  fn can_read(&self) -> bool {
    self.handle.is_valid() && self.access.can_read()
  }

  fn can_write(&self) -> bool {
    self.handle.is_valid() && self.access.can_write()
  }

  fn can_seek(&self) -> bool {
    self.handle.is_valid() && self.seekable
  }

  fn is_closed(&self) -> bool {
    !self.handle.is_valid()
  }

  fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
    if !self.seekable {
      return self.handle.read(buf);
    }
    let n = self.handle.read_at(buf, self.pos)?;
    self.pos += n as u64;
    Ok(n)
  }

  fn write(&mut self, buf: &[u8]) -> Result<()> {
    if !self.seekable {
      return self.handle.write_all(buf);
    }
    self.handle.write_all_at(buf, self.pos)?;
    self.pos += buf.len() as u64;
    Ok(())
  }

  fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
    self.ensure_seekable()?;
    let base = match origin {
      SeekOrigin::Begin => 0,
      SeekOrigin::Current => self.pos,
      SeekOrigin::End => self.handle.len()?,
    };
    self.pos = offset_position(base, offset)?;
    Ok(self.pos)
  }

  fn position(&mut self) -> Result<u64> {
    self.ensure_seekable()?;
    Ok(self.pos)
  }

  fn length(&mut self) -> Result<u64> {
    self.ensure_seekable()?;
    self.handle.len()
  }

  fn set_length(&mut self, length: u64) -> Result<()> {
    self.ensure_seekable()?;
    self.handle.set_len(length)?;
    self.pos = self.pos.min(length);
    Ok(())
  }

  fn flush(&mut self) -> Result<()> {
    self.handle.check()
  }

  fn close(&mut self) -> Result<()> {
    self.handle.close()
  }
}

/// A buffered stream over an OS file descriptor.
///
/// Reads and writes go to explicit offsets (`pread`/`pwrite`, or io_uring
/// when overlapped), so the descriptor's cursor only matters once
/// [`FileStream::handle`] has exposed it. From then on every operation
/// checks that nobody else moved the cursor and fails with
/// [`Error::StateCorruption`] if someone did.
///
/// ```rust,no_run
/// use strom::fs::FileStream;
/// use strom::io::Stream;
///
/// let mut file = FileStream::create("log.txt").unwrap();
/// file.write(b"first line\n").unwrap();
/// file.flush().unwrap();
/// ```
pub struct FileStream {
  inner: BufferedStream<RawFile>,
  append_start: Option<u64>,
  exposed: bool,
  #[cfg(all(target_os = "linux", feature = "uring"))]
  pub(crate) driver: Option<&'static Driver>,
}

impl FileStream {
  /// Opens an existing file for reading.
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    FileOptions::new().open(path)
  }

  /// Creates (or truncates) a file for reading and writing.
  pub fn create(path: impl AsRef<Path>) -> Result<Self> {
    FileOptions::new()
      .mode(FileMode::Create)
      .access(FileAccess::ReadWrite)
      .open(path)
  }

  pub fn options() -> FileOptions {
    FileOptions::new()
  }

  pub(crate) fn open_with(path: &Path, options: &FileOptions) -> Result<Self> {
    options.validate()?;
    let mut handle =
      FileHandle::open(path, options.open_flags(), options.permissions)?;
    handle.lock(options.share)?;
    Self::with_handle(handle, options)
  }

  /// Takes ownership of an open descriptor. Its access mode must allow
  /// `options.access`; the stream starts at the descriptor's current offset.
  pub fn from_fd(fd: OwnedFd, options: &FileOptions) -> Result<Self> {
    options.validate()?;
    Self::adopt(FileHandle::from_owned(fd), options)
  }

  /// Like [`FileStream::from_fd`], but with
  /// [`FileOptions::leave_open`] the descriptor is left open when the
  /// stream closes.
  ///
  /// # Safety
  ///
  /// `fd` must be an open descriptor. Unless `leave_open` is set the stream
  /// takes ownership of it and closes it.
  pub unsafe fn from_raw_fd(fd: RawFd, options: &FileOptions) -> Result<Self> {
    options.validate()?;
    let handle = if options.leave_open {
      FileHandle::borrowed(fd)
    } else {
      FileHandle::from_owned(OwnedFd::from_raw_fd(fd))
    };
    Self::adopt(handle, options)
  }

  fn adopt(mut handle: FileHandle, options: &FileOptions) -> Result<Self> {
    let actual = handle.access_mode()?;
    let wanted = options.access;
    if (wanted.can_read() && !actual.can_read())
      || (wanted.can_write() && !actual.can_write())
    {
      return Err(Error::argument(
        "access",
        "descriptor was not opened with the requested access",
      ));
    }
    Self::with_handle(handle, options)
  }

  fn with_handle(mut handle: FileHandle, options: &FileOptions) -> Result<Self> {
    let seekable = handle.is_seekable()?;
    let pos = if seekable { handle.cursor()? } else { 0 };

    let mut raw = RawFile { handle, access: options.access, seekable, pos };

    let mut append_start = None;
    if options.mode == FileMode::Append && seekable {
      let end = raw.handle.len()?;
      raw.pos = end;
      append_start = Some(end);
    }

    #[cfg(all(target_os = "linux", feature = "uring"))]
    let driver = if options.overlapped && seekable && raw.handle.is_regular()? {
      Driver::get()
    } else {
      None
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(
      path = ?raw.handle.path(),
      fd = raw.handle.raw(),
      seekable,
      overlapped_requested = options.overlapped,
      "file stream: opened"
    );

    let inner = BufferedStreamBuilder::new()
      .buffer_size(options.buffer_size)
      .shadow_limit(options.shadow_limit)
      .build(raw)?;

    Ok(Self {
      inner,
      append_start,
      exposed: false,
      #[cfg(all(target_os = "linux", feature = "uring"))]
      driver,
    })
  }

  pub fn path(&self) -> Option<&Path> {
    self.inner.get_ref().handle.path()
  }

  pub fn buffer_size(&self) -> usize {
    self.inner.buffer_size()
  }

  /// Whether asynchronous operations go straight to the kernel rather than
  /// through the blocking pool.
  pub fn is_overlapped(&self) -> bool {
    #[cfg(all(target_os = "linux", feature = "uring"))]
    {
      self.driver.is_some()
    }
    #[cfg(not(all(target_os = "linux", feature = "uring")))]
    {
      false
    }
  }

  /// The offset appends started at, for streams opened with
  /// [`FileMode::Append`].
  pub fn append_boundary(&self) -> Option<u64> {
    self.append_start
  }

  /// Flushes, moves the descriptor's cursor to the stream position and
  /// hands the descriptor out. From here on the stream verifies the cursor
  /// before each operation.
  pub fn handle(&mut self) -> Result<BorrowedFd<'_>> {
    self.observed(|this| this.inner.flush())?;
    self.exposed = true;
    self.leave()?;
    Ok(self.inner.get_ref().handle.borrow())
  }

  /// Flushes buffered bytes and asks the OS to persist the file.
  pub fn sync_all(&mut self) -> Result<()> {
    self.observed(|this| {
      this.inner.flush()?;
      this.inner.get_mut().handle.sync_all()
    })
  }

  pub(crate) fn inner_mut(&mut self) -> &mut BufferedStream<RawFile> {
    &mut self.inner
  }

  /// Runs `op` between the exposed-handle checks.
  fn observed<T>(
    &mut self,
    op: impl FnOnce(&mut Self) -> Result<T>,
  ) -> Result<T> {
    self.enter()?;
    let result = op(self);
    let settled = self.leave();
    result.and_then(|value| settled.map(|()| value))
  }

  pub(crate) fn enter(&mut self) -> Result<()> {
    if self.inner.is_closed() {
      return Err(Error::StreamClosed);
    }
    self.inner.get_ref().handle.check()?;
    if self.exposed {
      self.verify_position()?;
    }
    Ok(())
  }

  /// Keeps the descriptor's cursor where an outside observer expects it.
  pub(crate) fn leave(&mut self) -> Result<()> {
    if !self.exposed || self.inner.is_closed() {
      return Ok(());
    }
    let raw = self.inner.get_mut();
    if !raw.seekable || !raw.handle.is_valid() {
      return Ok(());
    }
    let pos = raw.pos;
    raw.handle.set_cursor(pos)
  }

  fn verify_position(&mut self) -> Result<()> {
    let raw = self.inner.get_mut();
    if !raw.seekable {
      return Ok(());
    }
    let expected = raw.pos;
    let actual = raw.handle.cursor()?;
    if actual == expected {
      return Ok(());
    }

    raw.pos = actual;
    self.inner.discard_buffers();

    #[cfg(feature = "tracing")]
    tracing::warn!(
      expected,
      actual,
      path = ?self.path(),
      "file stream: descriptor moved while exposed; buffers discarded"
    );
    Err(Error::StateCorruption { expected, actual })
  }

  fn check_boundary(&self, target: u64) -> Result<()> {
    match self.append_start {
      Some(boundary) if target < boundary => {
        Err(Error::AppendViolation { boundary })
      }
      _ => Ok(()),
    }
  }
}

impl Stream for FileStream {
  fn can_read(&self) -> bool {
    self.inner.can_read()
  }

  fn can_write(&self) -> bool {
    self.inner.can_write()
  }

  fn can_seek(&self) -> bool {
    self.inner.can_seek()
  }

  fn is_closed(&self) -> bool {
    self.inner.is_closed()
  }

  fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
    self.observed(|this| this.inner.read(buf))
  }

  fn write(&mut self, buf: &[u8]) -> Result<()> {
    self.observed(|this| this.inner.write(buf))
  }

  fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
    self.observed(|this| {
      if this.append_start.is_some() && this.inner.can_seek() {
        let base = match origin {
          SeekOrigin::Begin => 0,
          SeekOrigin::Current => this.inner.position()?,
          SeekOrigin::End => this.inner.length()?,
        };
        this.check_boundary(offset_position(base, offset)?)?;
      }
      this.inner.seek(offset, origin)
    })
  }

  fn position(&mut self) -> Result<u64> {
    self.observed(|this| this.inner.position())
  }

  fn length(&mut self) -> Result<u64> {
    self.observed(|this| this.inner.length())
  }

  fn set_length(&mut self, length: u64) -> Result<()> {
    self.observed(|this| {
      this.check_boundary(length)?;
      this.inner.set_length(length)
    })
  }

  fn flush(&mut self) -> Result<()> {
    self.observed(|this| this.inner.flush())
  }

  fn close(&mut self) -> Result<()> {
    self.inner.close()
  }

  fn as_overlapped(&mut self) -> Option<&mut dyn Overlapped> {
    #[cfg(all(target_os = "linux", feature = "uring"))]
    if self.driver.is_some() {
      return Some(self);
    }
    None
  }
}

impl std::fmt::Debug for FileStream {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FileStream")
      .field("inner", &self.inner)
      .field("append_start", &self.append_start)
      .field("exposed", &self.exposed)
      .field("overlapped", &self.is_overlapped())
      .finish()
  }
}
