use std::{mem::ManuallyDrop, ptr};

use super::{
  buffer::{BufferState, WritePlan, DEFAULT_BUFFER_SIZE, DEFAULT_SHADOW_LIMIT},
  offset_position, SeekOrigin, Stream,
};
use crate::error::{Error, Result};

/// Adds read-ahead and write coalescing to any [`Stream`].
///
/// The buffer holds either read-ahead or pending writes, never both: the
/// first write after a read gives unconsumed read-ahead back to the inner
/// stream (by seeking it backwards) and the first read after a write pushes
/// pending bytes out.
///
/// Reads or writes of at least `buffer_size` bytes skip the buffer. A write
/// that does not fit next to pending bytes is coalesced with them into one
/// inner write when the total stays within twice the buffer size and the
/// configured shadow limit.
///
/// ```rust
/// use strom::io::{BufferedStreamBuilder, MemoryStream, Stream};
///
/// let mut stream = BufferedStreamBuilder::new()
///   .buffer_size(4)
///   .build(MemoryStream::new())
///   .unwrap();
/// stream.write(b"AB").unwrap();
/// stream.write(b"CDEF").unwrap();
/// assert_eq!(stream.pending(), 0);
/// assert_eq!(stream.into_inner().unwrap().into_vec(), b"ABCDEF");
/// ```
pub struct BufferedStream<S: Stream> {
  inner: S,
  state: BufferState,
  leave_open: bool,
  closed: bool,
}

#[derive(Debug, Clone)]
pub struct BufferedStreamBuilder {
  buffer_size: usize,
  shadow_limit: usize,
  leave_open: bool,
}

impl Default for BufferedStreamBuilder {
  fn default() -> Self {
    Self {
      buffer_size: DEFAULT_BUFFER_SIZE,
      shadow_limit: DEFAULT_SHADOW_LIMIT,
      leave_open: false,
    }
  }
}

impl BufferedStreamBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Capacity of the internal buffer. Must be positive.
  pub fn buffer_size(mut self, size: usize) -> Self {
    self.buffer_size = size;
    self
  }

  /// Largest write, pending bytes included, that is coalesced into a single
  /// inner write.
  pub fn shadow_limit(mut self, limit: usize) -> Self {
    self.shadow_limit = limit;
    self
  }

  /// Keep the inner stream open when the buffered stream is closed.
  pub fn leave_open(mut self, leave_open: bool) -> Self {
    self.leave_open = leave_open;
    self
  }

  pub fn build<S: Stream>(self, inner: S) -> Result<BufferedStream<S>> {
    if self.buffer_size == 0 {
      return Err(Error::argument("buffer_size", "must be positive"));
    }
    if inner.is_closed() {
      return Err(Error::StreamClosed);
    }
    Ok(BufferedStream {
      inner,
      state: BufferState::new(self.buffer_size, self.shadow_limit),
      leave_open: self.leave_open,
      closed: false,
    })
  }
}

impl<S: Stream> BufferedStream<S> {
  /// Wraps `inner` with a 4096 byte buffer.
  pub fn new(inner: S) -> Self {
    Self {
      inner,
      state: BufferState::new(DEFAULT_BUFFER_SIZE, DEFAULT_SHADOW_LIMIT),
      leave_open: false,
      closed: false,
    }
  }

  pub fn buffer_size(&self) -> usize {
    self.state.buffer_size()
  }

  /// Read-ahead bytes not yet returned to a caller.
  pub fn unconsumed(&self) -> usize {
    self.state.unconsumed()
  }

  /// Written bytes not yet handed to the inner stream.
  pub fn pending(&self) -> usize {
    self.state.write_pos()
  }

  pub fn get_ref(&self) -> &S {
    &self.inner
  }

  /// Direct access to the inner stream. Reading, writing or seeking through
  /// it while bytes are buffered desynchronizes the two.
  pub fn get_mut(&mut self) -> &mut S {
    &mut self.inner
  }

  /// Flushes and returns the inner stream.
  pub fn into_inner(mut self) -> Result<S> {
    if !self.closed {
      self.flush()?;
    }
    let this = ManuallyDrop::new(self);
    // Safety: `this` is never touched again, so each field is read out
    // exactly once.
    let (inner, state) =
      unsafe { (ptr::read(&this.inner), ptr::read(&this.state)) };
    drop(state);
    Ok(inner)
  }

  pub(crate) fn parts_mut(&mut self) -> (&mut S, &mut BufferState) {
    (&mut self.inner, &mut self.state)
  }

  /// Forgets buffered bytes without touching the inner stream.
  pub(crate) fn discard_buffers(&mut self) {
    self.state.discard();
  }

  fn ensure_open(&self) -> Result<()> {
    if self.closed {
      return Err(Error::StreamClosed);
    }
    Ok(())
  }

  fn ensure_readable(&self) -> Result<()> {
    self.ensure_open()?;
    if !self.inner.can_read() {
      return Err(Error::UnsupportedOperation("stream does not support reading"));
    }
    Ok(())
  }

  fn ensure_writable(&self) -> Result<()> {
    self.ensure_open()?;
    if !self.inner.can_write() {
      return Err(Error::UnsupportedOperation("stream does not support writing"));
    }
    Ok(())
  }

  fn ensure_seekable(&self) -> Result<()> {
    self.ensure_open()?;
    if !self.inner.can_seek() {
      return Err(Error::UnsupportedOperation("stream does not support seeking"));
    }
    Ok(())
  }

  /// Hands pending bytes to the inner stream and flushes it.
  fn flush_write(&mut self) -> Result<()> {
    self.inner.write(self.state.pending_write())?;
    self.state.mark_written();
    self.inner.flush()
  }

  /// Gives unconsumed read-ahead back by moving the inner stream backwards.
  fn flush_read(&mut self) -> Result<()> {
    let unconsumed = self.state.unconsumed();
    if unconsumed > 0 {
      self.inner.seek(-(unconsumed as i64), SeekOrigin::Current)?;
    }
    self.state.clear_read();
    Ok(())
  }

  pub(crate) fn clear_read_before_write(&mut self) -> Result<()> {
    if !self.state.has_read_ahead() {
      self.state.clear_read();
      return Ok(());
    }
    if !self.inner.can_seek() {
      return Err(Error::UnsupportedOperation(
        "cannot write after reading ahead on a non-seekable stream",
      ));
    }
    self.flush_read()
  }
}

impl<S: Stream> Stream for BufferedStream<S> {
  fn can_read(&self) -> bool {
    !self.closed && self.inner.can_read()
  }

  fn can_write(&self) -> bool {
    !self.closed && self.inner.can_write()
  }

  fn can_seek(&self) -> bool {
    !self.closed && self.inner.can_seek()
  }

  fn is_closed(&self) -> bool {
    self.closed
  }

  fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
    self.ensure_readable()?;

    let from_buffer = self.state.read_from_buffer(buf);
    if from_buffer == buf.len() {
      return Ok(from_buffer);
    }
    let rest = &mut buf[from_buffer..];

    self.state.clear_read();
    if self.state.has_pending_write() {
      self.flush_write()?;
    }

    let result = if rest.len() >= self.state.buffer_size() {
      self.inner.read(rest)
    } else {
      match self.inner.read(self.state.fill_target()) {
        Ok(filled) => {
          self.state.set_filled(filled);
          Ok(self.state.read_from_buffer(rest))
        }
        Err(err) => Err(err),
      }
    };

    match result {
      Ok(n) => Ok(from_buffer + n),
      Err(err) => {
        // The caller gets nothing, so drained bytes stay readable.
        if from_buffer > 0 {
          self.state.unread(&buf[..from_buffer]);
        }
        Err(err)
      }
    }
  }

  fn write(&mut self, buf: &[u8]) -> Result<()> {
    self.ensure_writable()?;
    if buf.is_empty() {
      return Ok(());
    }

    if !self.state.has_pending_write() {
      self.clear_read_before_write()?;
    }

    match self.state.plan_write(buf.len()) {
      WritePlan::Buffer => {
        let taken = self.state.write_to_buffer(buf);
        if self.state.is_full() {
          if let Err(err) = self.inner.write(self.state.pending_write()) {
            self.state.unwrite(taken);
            return Err(err);
          }
          self.state.mark_written();
          self.state.write_to_buffer(&buf[taken..]);
        }
      }
      WritePlan::Shadow => {
        let shadow = self.state.shadow_with(buf);
        self.inner.write(&shadow)?;
        self.state.mark_written();
      }
      WritePlan::Direct => {
        if self.state.has_pending_write() {
          self.inner.write(self.state.pending_write())?;
          self.state.mark_written();
        }
        self.inner.write(buf)?;
      }
    }
    Ok(())
  }

  fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
    self.ensure_seekable()?;

    if self.state.has_pending_write() {
      self.flush_write()?;
      return self.inner.seek(offset, origin);
    }

    let unconsumed = self.state.unconsumed();
    let offset = if unconsumed > 0 && origin == SeekOrigin::Current {
      offset
        .checked_sub(unconsumed as i64)
        .ok_or(Error::argument("offset", "seek offset overflows"))?
    } else {
      offset
    };

    // Inner offset that the first buffered byte was read from.
    let inner_pos = self.inner.position()?;
    let buffer_start = inner_pos.saturating_sub(self.state.read_len() as u64);

    let new_pos = self.inner.seek(offset, origin)?;

    let in_buffer = new_pos >= buffer_start
      && new_pos < buffer_start + self.state.read_len() as u64;
    if !in_buffer {
      self.state.clear_read();
      return Ok(new_pos);
    }

    let read_pos = (new_pos - buffer_start) as usize;
    let forward = (self.state.read_len() - read_pos) as i64;
    if let Err(err) = self.inner.seek(forward, SeekOrigin::Current) {
      // The inner stream sits at `new_pos`, which matches an empty buffer.
      self.state.clear_read();
      return Err(err);
    }
    self.state.set_read_pos(read_pos);
    Ok(new_pos)
  }

  fn position(&mut self) -> Result<u64> {
    self.ensure_seekable()?;
    let inner_pos = self.inner.position()?;
    offset_position(inner_pos, self.state.logical_offset())
  }

  fn length(&mut self) -> Result<u64> {
    self.ensure_seekable()?;
    if self.state.has_pending_write() {
      self.flush_write()?;
    }
    self.inner.length()
  }

  fn set_length(&mut self, length: u64) -> Result<()> {
    self.ensure_seekable()?;
    if !self.inner.can_write() {
      return Err(Error::UnsupportedOperation("stream does not support writing"));
    }
    self.flush()?;
    self.inner.set_length(length)
  }

  fn flush(&mut self) -> Result<()> {
    self.ensure_open()?;

    if self.state.has_pending_write() {
      return self.flush_write();
    }

    if self.state.has_read_ahead() {
      // Read-ahead on a non-seekable stream cannot be given back.
      if !self.inner.can_seek() {
        return Ok(());
      }
      self.flush_read()?;
      if self.inner.can_write() {
        self.inner.flush()?;
      }
      return Ok(());
    }

    if self.inner.can_write() {
      self.inner.flush()?;
    }
    self.state.discard();
    Ok(())
  }

  fn close(&mut self) -> Result<()> {
    if self.closed {
      return Ok(());
    }

    let flushed = self.flush();
    self.state.release();
    self.closed = true;

    let closed = if self.leave_open { Ok(()) } else { self.inner.close() };
    flushed.and(closed)
  }
}

impl<S: Stream> Drop for BufferedStream<S> {
  fn drop(&mut self) {
    if let Err(_err) = self.close() {
      #[cfg(feature = "tracing")]
      tracing::warn!(error = %_err, "buffered stream: flush on drop failed");
    }
  }
}

impl<S: Stream + std::fmt::Debug> std::fmt::Debug for BufferedStream<S> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BufferedStream")
      .field("inner", &self.inner)
      .field("buffer_size", &self.state.buffer_size())
      .field("read_pos", &self.state.read_pos())
      .field("read_len", &self.state.read_len())
      .field("write_pos", &self.state.write_pos())
      .field("closed", &self.closed)
      .finish()
  }
}
