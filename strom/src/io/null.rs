use super::{SeekOrigin, Stream};
use crate::error::{Error, Result};

/// Discards every write and reads nothing.
#[derive(Debug, Default)]
pub struct NullStream {
  closed: bool,
}

impl NullStream {
  pub fn new() -> Self {
    Self::default()
  }

  fn ensure_open(&self) -> Result<()> {
    if self.closed {
      return Err(Error::StreamClosed);
    }
    Ok(())
  }
}

impl Stream for NullStream {
  fn can_read(&self) -> bool {
    !self.closed
  }

  fn can_write(&self) -> bool {
    !self.closed
  }

  fn can_seek(&self) -> bool {
    !self.closed
  }

  fn is_closed(&self) -> bool {
    self.closed
  }

  fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
    self.ensure_open()?;
    Ok(0)
  }

  fn write(&mut self, _buf: &[u8]) -> Result<()> {
    self.ensure_open()
  }

  fn seek(&mut self, _offset: i64, _origin: SeekOrigin) -> Result<u64> {
    self.ensure_open()?;
    Ok(0)
  }

  fn position(&mut self) -> Result<u64> {
    self.ensure_open()?;
    Ok(0)
  }

  fn length(&mut self) -> Result<u64> {
    self.ensure_open()?;
    Ok(0)
  }

  fn set_length(&mut self, _length: u64) -> Result<()> {
    self.ensure_open()
  }

  fn flush(&mut self) -> Result<()> {
    self.ensure_open()
  }

  fn close(&mut self) -> Result<()> {
    self.closed = true;
    Ok(())
  }
}

#[test]
fn swallows_writes() {
  let mut stream = NullStream::new();
  stream.write(b"gone").unwrap();
  assert_eq!(stream.read(&mut [0u8; 4]).unwrap(), 0);
  assert_eq!(stream.length().unwrap(), 0);
}
