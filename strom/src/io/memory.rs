use super::{offset_position, SeekOrigin, Stream};
use crate::error::{Error, Result};

/// A seekable stream over a growable byte vector.
///
/// Seeking past the end is allowed; the next write fills the gap with zeros.
#[derive(Debug, Default, Clone)]
pub struct MemoryStream {
  data: Vec<u8>,
  position: u64,
  writable: bool,
  closed: bool,
}

impl MemoryStream {
  pub fn new() -> Self {
    Self { writable: true, ..Default::default() }
  }

  pub fn with_capacity(capacity: usize) -> Self {
    Self { data: Vec::with_capacity(capacity), ..Self::new() }
  }

  /// A stream over `data` that rejects writes.
  pub fn read_only(data: Vec<u8>) -> Self {
    Self { data, ..Default::default() }
  }

  pub fn as_slice(&self) -> &[u8] {
    &self.data
  }

  pub fn into_vec(self) -> Vec<u8> {
    self.data
  }

  fn ensure_open(&self) -> Result<()> {
    if self.closed {
      return Err(Error::StreamClosed);
    }
    Ok(())
  }

  fn ensure_writable(&self) -> Result<()> {
    self.ensure_open()?;
    if !self.writable {
      return Err(Error::UnsupportedOperation("stream does not support writing"));
    }
    Ok(())
  }

  fn index(position: u64) -> Result<usize> {
    usize::try_from(position)
      .map_err(|_| Error::argument("position", "exceeds addressable memory"))
  }
}

impl From<Vec<u8>> for MemoryStream {
  fn from(data: Vec<u8>) -> Self {
    Self { data, ..Self::new() }
  }
}

impl Stream for MemoryStream {
  fn can_read(&self) -> bool {
    !self.closed
  }

  fn can_write(&self) -> bool {
    !self.closed && self.writable
  }

  fn can_seek(&self) -> bool {
    !self.closed
  }

  fn is_closed(&self) -> bool {
    self.closed
  }

  fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
    self.ensure_open()?;
    let len = self.data.len() as u64;
    if self.position >= len {
      return Ok(0);
    }
    let start = self.position as usize;
    let n = buf.len().min(self.data.len() - start);
    buf[..n].copy_from_slice(&self.data[start..start + n]);
    self.position += n as u64;
    Ok(n)
  }

  fn write(&mut self, buf: &[u8]) -> Result<()> {
    self.ensure_writable()?;
    // An empty write past the end does not extend the stream.
    if buf.is_empty() {
      return Ok(());
    }
    let start = Self::index(self.position)?;
    let end = start
      .checked_add(buf.len())
      .ok_or(Error::argument("buf", "write runs past addressable memory"))?;
    if end > self.data.len() {
      self.data.resize(end, 0);
    }
    self.data[start..end].copy_from_slice(buf);
    self.position = end as u64;
    Ok(())
  }

  fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
    self.ensure_open()?;
    let base = match origin {
      SeekOrigin::Begin => 0,
      SeekOrigin::Current => self.position,
      SeekOrigin::End => self.data.len() as u64,
    };
    self.position = offset_position(base, offset)?;
    Ok(self.position)
  }

  fn position(&mut self) -> Result<u64> {
    self.ensure_open()?;
    Ok(self.position)
  }

  fn length(&mut self) -> Result<u64> {
    self.ensure_open()?;
    Ok(self.data.len() as u64)
  }

  fn set_length(&mut self, length: u64) -> Result<()> {
    self.ensure_writable()?;
    self.data.resize(Self::index(length)?, 0);
    self.position = self.position.min(length);
    Ok(())
  }

  fn flush(&mut self) -> Result<()> {
    self.ensure_open()
  }

  fn close(&mut self) -> Result<()> {
    self.closed = true;
    Ok(())
  }
}
