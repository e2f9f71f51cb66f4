#![allow(dead_code)]

use std::{
  sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex, Once,
  },
  thread,
  time::Duration,
};

use strom::{
  io::{MemoryStream, SeekOrigin, Stream},
  Error, Result,
};

pub fn init_tracing() {
  static INIT: Once = Once::new();
  INIT.call_once(|| {
    let _ = tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
      .with_test_writer()
      .try_init();
  });
}

/// What a [`Recording`] stream saw. Shared so tests can look at it after the
/// stream has been moved into a wrapper.
#[derive(Default, Debug)]
pub struct Calls {
  pub writes: Mutex<Vec<usize>>,
  pub reads: AtomicUsize,
  pub flushes: AtomicUsize,
  pub active: AtomicUsize,
  pub max_active: AtomicUsize,
  pub fail_writes: AtomicBool,
  pub fail_reads: AtomicBool,
}

impl Calls {
  pub fn writes(&self) -> Vec<usize> {
    self.writes.lock().unwrap().clone()
  }

  pub fn reads(&self) -> usize {
    self.reads.load(Ordering::SeqCst)
  }

  pub fn max_active(&self) -> usize {
    self.max_active.load(Ordering::SeqCst)
  }
}

/// A memory stream that records every call reaching it.
pub struct Recording {
  inner: MemoryStream,
  calls: Arc<Calls>,
  seekable: bool,
  delay: Option<Duration>,
}

impl Recording {
  pub fn new(data: &[u8]) -> (Self, Arc<Calls>) {
    let calls = Arc::new(Calls::default());
    let stream = Self {
      inner: MemoryStream::from(data.to_vec()),
      calls: calls.clone(),
      seekable: true,
      delay: None,
    };
    (stream, calls)
  }

  pub fn unseekable(mut self) -> Self {
    self.seekable = false;
    self
  }

  /// Makes every read and write take at least `delay`.
  pub fn slow(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn data(&self) -> &[u8] {
    self.inner.as_slice()
  }

  fn ensure_seekable(&self) -> Result<()> {
    if !self.seekable {
      return Err(Error::UnsupportedOperation("stream does not support seeking"));
    }
    Ok(())
  }
}

impl Stream for Recording {
  fn can_read(&self) -> bool {
    self.inner.can_read()
  }

  fn can_write(&self) -> bool {
    self.inner.can_write()
  }

  fn can_seek(&self) -> bool {
    self.seekable && self.inner.can_seek()
  }

  fn is_closed(&self) -> bool {
    self.inner.is_closed()
  }

  fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
    if self.calls.fail_reads.load(Ordering::SeqCst) {
      return Err(injected());
    }
    self.calls.reads.fetch_add(1, Ordering::SeqCst);
    let _busy = Busy::enter(&self.calls, self.delay);
    self.inner.read(buf)
  }

  fn write(&mut self, buf: &[u8]) -> Result<()> {
    if self.calls.fail_writes.load(Ordering::SeqCst) {
      return Err(injected());
    }
    self.calls.writes.lock().unwrap().push(buf.len());
    let _busy = Busy::enter(&self.calls, self.delay);
    self.inner.write(buf)
  }

  fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
    self.ensure_seekable()?;
    self.inner.seek(offset, origin)
  }

  fn position(&mut self) -> Result<u64> {
    self.ensure_seekable()?;
    self.inner.position()
  }

  fn length(&mut self) -> Result<u64> {
    self.ensure_seekable()?;
    self.inner.length()
  }

  fn set_length(&mut self, length: u64) -> Result<()> {
    self.ensure_seekable()?;
    self.inner.set_length(length)
  }

  fn flush(&mut self) -> Result<()> {
    self.calls.flushes.fetch_add(1, Ordering::SeqCst);
    self.inner.flush()
  }

  fn close(&mut self) -> Result<()> {
    self.inner.close()
  }
}

fn injected() -> Error {
  Error::Io {
    source: std::io::Error::other("injected failure"),
    path: None,
  }
}

/// Counts a call as in flight until dropped.
struct Busy<'a>(&'a Calls);

impl<'a> Busy<'a> {
  fn enter(calls: &'a Calls, delay: Option<Duration>) -> Self {
    let now = calls.active.fetch_add(1, Ordering::SeqCst) + 1;
    calls.max_active.fetch_max(now, Ordering::SeqCst);
    if let Some(delay) = delay {
      thread::sleep(delay);
    }
    Busy(calls)
  }
}

impl Drop for Busy<'_> {
  fn drop(&mut self) {
    self.0.active.fetch_sub(1, Ordering::SeqCst);
  }
}
