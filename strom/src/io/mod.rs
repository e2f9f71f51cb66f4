//! The capability-typed [`Stream`] contract and the streams built on it.
//!
//! Every stream offers blocking `read`/`write`/`seek`/`flush`. Sharing a
//! stream through [`AsyncStream`] adds cancellable asynchronous reads and
//! writes (and the begin/end calling pattern) on top, running the blocking
//! calls on the [`blocking`](crate::blocking) pool unless the stream brings
//! its own kernel-asynchronous path through [`Overlapped`].

mod adapter;
mod apm;
pub(crate) mod buffer;
mod buffered;
mod memory;
mod null;

pub use adapter::{AsyncStream, Rejected};
pub use apm::{AsyncResult, Callback};
pub use buffered::{BufferedStream, BufferedStreamBuilder};
pub use memory::MemoryStream;
pub use null::NullStream;

pub use crate::error::BufResult;

use crate::{
  error::{Error, Result},
  future::IoFuture,
  sync::CancellationToken,
};

/// Reference point for [`Stream::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
  Begin,
  Current,
  End,
}

/// Snapshot of what a stream can do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
  pub read: bool,
  pub write: bool,
  pub seek: bool,
}

/// A byte stream with fixed read, write and seek capabilities.
///
/// Positions and lengths are byte offsets. Once [`Stream::close`] has been
/// called every capability reports `false` and every operation fails with
/// [`Error::StreamClosed`].
///
/// Methods take `&mut self`: a stream is never used by two callers at once.
/// Share one through [`AsyncStream`] to get serialized access from several
/// threads or tasks.
pub trait Stream: Send {
  fn can_read(&self) -> bool;
  fn can_write(&self) -> bool;
  fn can_seek(&self) -> bool;

  fn capabilities(&self) -> Capabilities {
    Capabilities {
      read: self.can_read(),
      write: self.can_write(),
      seek: self.can_seek(),
    }
  }

  fn is_closed(&self) -> bool;

  /// Reads up to `buf.len()` bytes. `Ok(0)` means end of stream (or an
  /// empty `buf`).
  fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

  /// Writes all of `buf`.
  fn write(&mut self, buf: &[u8]) -> Result<()>;

  /// Moves the position and returns the new absolute position.
  fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64>;

  fn position(&mut self) -> Result<u64>;

  fn set_position(&mut self, position: u64) -> Result<()> {
    let offset = i64::try_from(position)
      .map_err(|_| Error::argument("position", "exceeds i64::MAX"))?;
    self.seek(offset, SeekOrigin::Begin).map(drop)
  }

  fn length(&mut self) -> Result<u64>;

  fn set_length(&mut self, length: u64) -> Result<()>;

  fn flush(&mut self) -> Result<()>;

  /// Flushes and releases the stream. Closing twice is a no-op.
  fn close(&mut self) -> Result<()>;

  /// Reads a single byte, `None` at end of stream.
  fn read_byte(&mut self) -> Result<Option<u8>> {
    let mut byte = [0u8; 1];
    match self.read(&mut byte)? {
      0 => Ok(None),
      _ => Ok(Some(byte[0])),
    }
  }

  fn write_byte(&mut self, byte: u8) -> Result<()> {
    self.write(&[byte])
  }

  /// Copies the rest of this stream into `destination`, `buffer_size` bytes
  /// at a time. Returns the number of bytes copied.
  fn copy_to(
    &mut self,
    destination: &mut dyn Stream,
    buffer_size: usize,
  ) -> Result<u64> {
    if buffer_size == 0 {
      return Err(Error::argument("buffer_size", "must be positive"));
    }
    if self.is_closed() || destination.is_closed() {
      return Err(Error::StreamClosed);
    }
    if !self.can_read() {
      return Err(Error::UnsupportedOperation("stream does not support reading"));
    }
    if !destination.can_write() {
      return Err(Error::UnsupportedOperation(
        "destination does not support writing",
      ));
    }

    let mut chunk = vec![0u8; buffer_size];
    let mut copied = 0u64;
    loop {
      let n = self.read(&mut chunk)?;
      if n == 0 {
        return Ok(copied);
      }
      destination.write(&chunk[..n])?;
      copied += n as u64;
    }
  }

  /// The stream's kernel-asynchronous path, if it has one. Streams returning
  /// `None` get their asynchronous operations from the worker pool.
  fn as_overlapped(&mut self) -> Option<&mut dyn Overlapped> {
    None
  }
}

/// Native asynchronous reads and writes.
///
/// Implementations must leave the stream consistent if the returned future
/// is dropped before it resolves: state is only committed once the kernel
/// has reported completion.
pub trait Overlapped: Send {
  fn read_overlapped(
    &mut self,
    buf: Vec<u8>,
    offset: usize,
    count: usize,
    cancel: CancellationToken,
  ) -> IoFuture<'_, BufResult<usize, Vec<u8>>>;

  fn write_overlapped(
    &mut self,
    buf: Vec<u8>,
    offset: usize,
    count: usize,
    cancel: CancellationToken,
  ) -> IoFuture<'_, BufResult<(), Vec<u8>>>;
}

impl<S: Stream + ?Sized> Stream for Box<S> {
  fn can_read(&self) -> bool {
    (**self).can_read()
  }

  fn can_write(&self) -> bool {
    (**self).can_write()
  }

  fn can_seek(&self) -> bool {
    (**self).can_seek()
  }

  fn is_closed(&self) -> bool {
    (**self).is_closed()
  }

  fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
    (**self).read(buf)
  }

  fn write(&mut self, buf: &[u8]) -> Result<()> {
    (**self).write(buf)
  }

  fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
    (**self).seek(offset, origin)
  }

  fn position(&mut self) -> Result<u64> {
    (**self).position()
  }

  fn length(&mut self) -> Result<u64> {
    (**self).length()
  }

  fn set_length(&mut self, length: u64) -> Result<()> {
    (**self).set_length(length)
  }

  fn flush(&mut self) -> Result<()> {
    (**self).flush()
  }

  fn close(&mut self) -> Result<()> {
    (**self).close()
  }

  fn as_overlapped(&mut self) -> Option<&mut dyn Overlapped> {
    (**self).as_overlapped()
  }
}

impl<S: Stream + ?Sized> Stream for &mut S {
  fn can_read(&self) -> bool {
    (**self).can_read()
  }

  fn can_write(&self) -> bool {
    (**self).can_write()
  }

  fn can_seek(&self) -> bool {
    (**self).can_seek()
  }

  fn is_closed(&self) -> bool {
    (**self).is_closed()
  }

  fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
    (**self).read(buf)
  }

  fn write(&mut self, buf: &[u8]) -> Result<()> {
    (**self).write(buf)
  }

  fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
    (**self).seek(offset, origin)
  }

  fn position(&mut self) -> Result<u64> {
    (**self).position()
  }

  fn length(&mut self) -> Result<u64> {
    (**self).length()
  }

  fn set_length(&mut self, length: u64) -> Result<()> {
    (**self).set_length(length)
  }

  fn flush(&mut self) -> Result<()> {
    (**self).flush()
  }

  fn close(&mut self) -> Result<()> {
    (**self).close()
  }

  fn as_overlapped(&mut self) -> Option<&mut dyn Overlapped> {
    (**self).as_overlapped()
  }
}

/// Checks that `offset..offset + count` lies inside a buffer of `len` bytes.
pub(crate) fn check_range(len: usize, offset: usize, count: usize) -> Result<()> {
  if offset > len {
    return Err(Error::argument("offset", "outside the buffer"));
  }
  if count > len - offset {
    return Err(Error::argument("count", "runs past the end of the buffer"));
  }
  Ok(())
}

/// Resolves `base + offset`, rejecting positions before the start.
pub(crate) fn offset_position(base: u64, offset: i64) -> Result<u64> {
  let target = i128::from(base) + i128::from(offset);
  if target < 0 {
    return Err(Error::argument(
      "offset",
      "seek moves before the beginning of the stream",
    ));
  }
  u64::try_from(target)
    .map_err(|_| Error::argument("offset", "seek moves past u64::MAX"))
}

#[test]
fn range_checks() {
  assert!(check_range(10, 0, 10).is_ok());
  assert!(check_range(10, 10, 0).is_ok());
  assert!(check_range(10, 11, 0).is_err());
  assert!(check_range(10, 4, 7).is_err());
  assert!(check_range(10, usize::MAX, 2).is_err());
}

#[test]
fn offset_positions() {
  assert_eq!(offset_position(10, -10).unwrap(), 0);
  assert_eq!(offset_position(10, 5).unwrap(), 15);
  assert!(matches!(
    offset_position(3, -4),
    Err(Error::ArgumentInvalid { name: "offset", .. })
  ));
}
