use std::{
  future::Future,
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
  },
};

use thiserror::Error;

use super::{check_range, Capabilities, Stream};
use crate::{
  blocking,
  error::{BufResult, Error, Result},
  future::FutureExt,
  sync::{CancellationToken, Mutex, OwnedMutexGuard},
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Shared handle that runs a [`Stream`]'s operations asynchronously, one at a
/// time.
///
/// Every asynchronous operation holds the stream's lock from the moment it
/// starts until it has finished, so at most one is in flight per stream and
/// callers queue in arrival order. Streams with a native asynchronous path
/// (see [`Stream::as_overlapped`]) use it; all others have their blocking
/// call run on the [`blocking`](crate::blocking) pool.
///
/// ```rust
/// use strom::io::{AsyncStream, MemoryStream};
/// use strom::sync::CancellationToken;
///
/// let stream = AsyncStream::new(MemoryStream::new());
/// let token = CancellationToken::new();
///
/// strom::future::block_on(async {
///   let write = stream.write_async(b"hello".to_vec(), 0, 5, &token).unwrap();
///   let (result, _buf) = write.await;
///   result.unwrap();
/// });
/// ```
pub struct AsyncStream<S> {
  stream: Arc<Mutex<S>>,
  capabilities: Capabilities,
  id: u64,
}

impl<S> Clone for AsyncStream<S> {
  fn clone(&self) -> Self {
    Self {
      stream: self.stream.clone(),
      capabilities: self.capabilities,
      id: self.id,
    }
  }
}

/// An asynchronous call refused before it started. Carries the caller's
/// buffer back.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct Rejected {
  #[source]
  pub error: Error,
  pub buf: Vec<u8>,
}

impl Rejected {
  pub fn into_parts(self) -> (Error, Vec<u8>) {
    (self.error, self.buf)
  }
}

impl<S: Stream + 'static> AsyncStream<S> {
  pub fn new(stream: S) -> Self {
    Self {
      capabilities: stream.capabilities(),
      stream: Arc::new(Mutex::new(stream)),
      id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
    }
  }

  /// Capabilities the stream had when it was wrapped.
  pub fn capabilities(&self) -> Capabilities {
    self.capabilities
  }

  pub(crate) fn id(&self) -> u64 {
    self.id
  }

  /// Waits for every earlier operation to finish and takes the stream.
  pub async fn lock(&self) -> Result<OwnedMutexGuard<S>> {
    self.stream.clone().lock_owned().await.map_err(|_| poisoned())
  }

  /// Blocking form of [`AsyncStream::lock`], for synchronous calls on a
  /// shared stream.
  pub fn lock_blocking(&self) -> Result<OwnedMutexGuard<S>> {
    crate::future::block_on(self.lock())
  }

  /// Unwraps the stream, or hands the handle back while other clones (or a
  /// running operation) still hold it.
  pub fn into_inner(self) -> std::result::Result<S, Self> {
    let Self { stream, capabilities, id } = self;
    match Arc::try_unwrap(stream) {
      Ok(mutex) => Ok(mutex.into_inner()),
      Err(stream) => Err(Self { stream, capabilities, id }),
    }
  }

  /// Reads up to `count` bytes into `buf[offset..offset + count]`.
  ///
  /// Argument and capability errors come back immediately as
  /// [`Rejected`]. The returned future does nothing if `cancel` has already
  /// fired; it resolves with the number of bytes read and the buffer.
  pub fn read_async(
    &self,
    buf: Vec<u8>,
    offset: usize,
    count: usize,
    cancel: &CancellationToken,
  ) -> std::result::Result<
    impl Future<Output = BufResult<usize, Vec<u8>>> + Send + 'static,
    Rejected,
  > {
    if let Err(error) = check_range(buf.len(), offset, count) {
      return Err(Rejected { error, buf });
    }
    if !self.capabilities.read {
      let error = Error::UnsupportedOperation("stream does not support reading");
      return Err(Rejected { error, buf });
    }

    let stream = self.stream.clone();
    let cancel = cancel.clone();

    Ok(async move {
      let mut guard = match acquire(stream, &cancel).await {
        Ok(guard) => guard,
        Err(err) => return (Err(err), buf),
      };

      if let Some(native) = guard.as_overlapped() {
        return native.read_overlapped(buf, offset, count, cancel).await;
      }

      blocking::unblock(move || {
        let mut buf = buf;
        let result = guard.read(&mut buf[offset..offset + count]);
        drop(guard);
        (result, buf)
      })
      .await
    })
  }

  /// Writes `buf[offset..offset + count]`. Same contract as
  /// [`AsyncStream::read_async`].
  pub fn write_async(
    &self,
    buf: Vec<u8>,
    offset: usize,
    count: usize,
    cancel: &CancellationToken,
  ) -> std::result::Result<
    impl Future<Output = BufResult<(), Vec<u8>>> + Send + 'static,
    Rejected,
  > {
    if let Err(error) = check_range(buf.len(), offset, count) {
      return Err(Rejected { error, buf });
    }
    if !self.capabilities.write {
      let error = Error::UnsupportedOperation("stream does not support writing");
      return Err(Rejected { error, buf });
    }

    let stream = self.stream.clone();
    let cancel = cancel.clone();

    Ok(async move {
      let mut guard = match acquire(stream, &cancel).await {
        Ok(guard) => guard,
        Err(err) => return (Err(err), buf),
      };

      if let Some(native) = guard.as_overlapped() {
        return native.write_overlapped(buf, offset, count, cancel).await;
      }

      blocking::unblock(move || {
        let result = guard.write(&buf[offset..offset + count]);
        drop(guard);
        (result, buf)
      })
      .await
    })
  }
}

/// Takes the stream lock unless `cancel` fires first. A cancellation seen
/// after the lock was won still counts: no I/O has been started yet.
async fn acquire<S>(
  stream: Arc<Mutex<S>>,
  cancel: &CancellationToken,
) -> Result<OwnedMutexGuard<S>> {
  if cancel.is_cancelled() {
    return Err(Error::Cancelled);
  }

  let locked = async { stream.lock_owned().await.map_err(|_| poisoned()) };
  let cancelled = async {
    cancel.cancelled().await;
    Err(Error::Cancelled)
  };
  let guard = locked.or(cancelled).await?;

  if cancel.is_cancelled() {
    return Err(Error::Cancelled);
  }
  Ok(guard)
}

fn poisoned() -> Error {
  Error::InvalidState("stream lock poisoned by a panicking operation")
}
