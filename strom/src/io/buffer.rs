//! Read-ahead / write-behind bookkeeping shared by every buffered stream.
//!
//! The buffer holds either unconsumed read-ahead (`read_pos..read_len`) or
//! pending writes (`..write_pos`), never both at once. Callers own the
//! underlying I/O; this type only tracks what the buffer contains and decides
//! how a write should be carried out.

pub(crate) const DEFAULT_BUFFER_SIZE: usize = 4096;
pub(crate) const DEFAULT_SHADOW_LIMIT: usize = 81920;

/// How a write of `count` bytes is carried out given what is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WritePlan {
  /// Copy into the buffer, writing it out once if it fills up.
  Buffer,
  /// Pending bytes and the new bytes go out together in one write.
  Shadow,
  /// Write out pending bytes (if any), then the caller's bytes unbuffered.
  Direct,
}

#[derive(Debug)]
pub(crate) struct BufferState {
  buf: Option<Vec<u8>>,
  buffer_size: usize,
  shadow_limit: usize,
  read_pos: usize,
  read_len: usize,
  write_pos: usize,
}

impl BufferState {
  pub(crate) fn new(buffer_size: usize, shadow_limit: usize) -> Self {
    debug_assert!(buffer_size > 0);
    Self {
      buf: None,
      buffer_size,
      shadow_limit,
      read_pos: 0,
      read_len: 0,
      write_pos: 0,
    }
  }

  pub(crate) fn buffer_size(&self) -> usize {
    self.buffer_size
  }

  pub(crate) fn read_pos(&self) -> usize {
    self.read_pos
  }

  pub(crate) fn read_len(&self) -> usize {
    self.read_len
  }

  pub(crate) fn write_pos(&self) -> usize {
    self.write_pos
  }

  #[cfg(test)]
  pub(crate) fn is_allocated(&self) -> bool {
    self.buf.is_some()
  }

  /// Read-ahead bytes not yet handed to a caller.
  pub(crate) fn unconsumed(&self) -> usize {
    self.read_len - self.read_pos
  }

  pub(crate) fn has_read_ahead(&self) -> bool {
    self.read_pos < self.read_len
  }

  pub(crate) fn has_pending_write(&self) -> bool {
    self.write_pos > 0
  }

  /// Distance between the logical position and the underlying position.
  pub(crate) fn logical_offset(&self) -> i64 {
    self.write_pos as i64 - self.unconsumed() as i64
  }

  pub(crate) fn clear_read(&mut self) {
    self.read_pos = 0;
    self.read_len = 0;
  }

  /// Forgets everything buffered, read-ahead and pending writes alike.
  pub(crate) fn discard(&mut self) {
    self.clear_read();
    self.write_pos = 0;
  }

  /// Drops the allocation. The next buffered call allocates again.
  pub(crate) fn release(&mut self) {
    self.discard();
    self.buf = None;
  }

  fn ensure(&mut self) -> &mut Vec<u8> {
    let size = self.buffer_size;
    self.buf.get_or_insert_with(|| vec![0u8; size])
  }

  /// Copies unconsumed read-ahead into `dst`.
  pub(crate) fn read_from_buffer(&mut self, dst: &mut [u8]) -> usize {
    let n = dst.len().min(self.unconsumed());
    if n == 0 {
      return 0;
    }
    let Some(buf) = self.buf.as_ref() else {
      return 0;
    };
    dst[..n].copy_from_slice(&buf[self.read_pos..self.read_pos + n]);
    self.read_pos += n;
    n
  }

  /// The whole buffer, ready to be filled by a read-ahead. Commit the result
  /// with [`BufferState::set_filled`].
  pub(crate) fn fill_target(&mut self) -> &mut [u8] {
    debug_assert!(!self.has_pending_write());
    self.ensure().as_mut_slice()
  }

  pub(crate) fn set_filled(&mut self, len: usize) {
    debug_assert!(len <= self.buffer_size);
    self.read_pos = 0;
    self.read_len = len;
  }

  /// Puts bytes already copied out back as unconsumed read-ahead, for a read
  /// that fails after draining the buffer.
  pub(crate) fn unread(&mut self, src: &[u8]) {
    debug_assert!(!self.has_pending_write() && src.len() <= self.buffer_size);
    self.ensure()[..src.len()].copy_from_slice(src);
    self.read_pos = 0;
    self.read_len = src.len();
  }

  /// Moves the read cursor to `read_pos`, which must lie in
  /// `0..=read_len`.
  pub(crate) fn set_read_pos(&mut self, read_pos: usize) {
    debug_assert!(read_pos <= self.read_len);
    self.read_pos = read_pos;
  }

  /// Bytes waiting to be written out.
  pub(crate) fn pending_write(&self) -> &[u8] {
    match &self.buf {
      Some(buf) => &buf[..self.write_pos],
      None => &[],
    }
  }

  /// Marks the pending bytes as written.
  pub(crate) fn mark_written(&mut self) {
    self.write_pos = 0;
  }

  /// Appends as much of `src` as fits and returns how many bytes were taken.
  pub(crate) fn write_to_buffer(&mut self, src: &[u8]) -> usize {
    debug_assert!(!self.has_read_ahead());
    let write_pos = self.write_pos;
    let room = self.buffer_size - write_pos;
    let n = src.len().min(room);
    if n == 0 {
      return 0;
    }
    self.ensure()[write_pos..write_pos + n].copy_from_slice(&src[..n]);
    self.write_pos += n;
    n
  }

  /// Takes back the last `count` buffered bytes after a failed write-out.
  pub(crate) fn unwrite(&mut self, count: usize) {
    debug_assert!(count <= self.write_pos);
    self.write_pos -= count;
  }

  pub(crate) fn is_full(&self) -> bool {
    self.write_pos == self.buffer_size
  }

  pub(crate) fn plan_write(&self, count: usize) -> WritePlan {
    let twice = self.buffer_size.saturating_mul(2);
    let total = self.write_pos.saturating_add(count);

    if total.saturating_add(count) < twice {
      return WritePlan::Buffer;
    }
    if self.write_pos > 0 && total <= twice && total <= self.shadow_limit {
      return WritePlan::Shadow;
    }
    WritePlan::Direct
  }

  /// Pending bytes followed by `src`, for a single coalesced write.
  pub(crate) fn shadow_with(&self, src: &[u8]) -> Vec<u8> {
    let pending = self.pending_write();
    let mut shadow = Vec::with_capacity(pending.len() + src.len());
    shadow.extend_from_slice(pending);
    shadow.extend_from_slice(src);
    shadow
  }

  /// Lends the allocation out for an owned-buffer kernel operation. Give it
  /// back with [`BufferState::restore`].
  pub(crate) fn take(&mut self) -> Vec<u8> {
    self.ensure();
    self.buf.take().unwrap_or_default()
  }

  pub(crate) fn restore(&mut self, buf: Vec<u8>) {
    debug_assert_eq!(buf.len(), self.buffer_size);
    self.buf = Some(buf);
  }

  #[cfg(test)]
  pub(crate) fn holds_invariant(&self) -> bool {
    !(self.has_read_ahead() && self.has_pending_write())
      && self.read_pos <= self.read_len
      && self.read_len <= self.buffer_size
      && self.write_pos <= self.buffer_size
  }
}
