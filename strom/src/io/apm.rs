//! The begin/end calling pattern on top of [`AsyncStream`].
//!
//! `begin_*` starts the operation and returns an [`AsyncResult`] right away;
//! `end_*` waits for it and yields the outcome. No thread is dedicated to the
//! operation: the future is polled inline by whichever thread wakes it, and
//! the optional callback runs on the thread that completes it.

use std::{
  future::Future,
  pin::Pin,
  sync::{
    atomic::{AtomicBool, AtomicU8, Ordering},
    Arc,
  },
  task::{Context, Poll, Wake, Waker},
  time::Duration,
};

use parking_lot::{Condvar, Mutex};

use super::{AsyncStream, Rejected, Stream};
use crate::{
  error::{BufResult, Error, Result},
  sync::CancellationToken,
};

/// Completion callback for [`AsyncStream::begin_read`] and
/// [`AsyncStream::begin_write`].
pub type Callback<T> = Box<dyn FnOnce(&AsyncResult<T>) + Send>;

type Operation<T> = Pin<Box<dyn Future<Output = BufResult<T, Vec<u8>>> + Send>>;

/// Handle to an operation started with `begin_read` or `begin_write`.
pub struct AsyncResult<T> {
  shared: Arc<Completion<T>>,
}

impl<T> Clone for AsyncResult<T> {
  fn clone(&self) -> Self {
    Self { shared: self.shared.clone() }
  }
}

struct Completion<T> {
  stream_id: u64,
  slot: Mutex<Slot<T>>,
  ready: Condvar,
  synchronously: AtomicBool,
}

enum Slot<T> {
  Pending,
  Ready(BufResult<T, Vec<u8>>),
  Ended,
}

impl<T> AsyncResult<T> {
  fn new(stream_id: u64) -> Self {
    Self {
      shared: Arc::new(Completion {
        stream_id,
        slot: Mutex::new(Slot::Pending),
        ready: Condvar::new(),
        synchronously: AtomicBool::new(false),
      }),
    }
  }

  pub fn is_completed(&self) -> bool {
    !matches!(*self.shared.slot.lock(), Slot::Pending)
  }

  /// Whether the operation had already finished when `begin_*` returned.
  pub fn completed_synchronously(&self) -> bool {
    self.shared.synchronously.load(Ordering::Acquire)
  }

  /// Blocks until the operation has finished.
  pub fn wait(&self) {
    let mut slot = self.shared.slot.lock();
    while matches!(*slot, Slot::Pending) {
      self.shared.ready.wait(&mut slot);
    }
  }

  /// Like [`AsyncResult::wait`], giving up after `timeout`. Returns whether
  /// the operation finished.
  pub fn wait_timeout(&self, timeout: Duration) -> bool {
    let mut slot = self.shared.slot.lock();
    if matches!(*slot, Slot::Pending) {
      self.shared.ready.wait_while_for(
        &mut slot,
        |slot| matches!(slot, Slot::Pending),
        timeout,
      );
    }
    !matches!(*slot, Slot::Pending)
  }

  fn complete(&self, output: BufResult<T, Vec<u8>>, synchronously: bool) {
    self.shared.synchronously.store(synchronously, Ordering::Release);
    *self.shared.slot.lock() = Slot::Ready(output);
    self.shared.ready.notify_all();
  }

  fn end(&self, stream_id: u64) -> Result<(T, Vec<u8>)> {
    if self.shared.stream_id != stream_id {
      return Err(Error::InvalidState(
        "async result belongs to a different stream",
      ));
    }

    let mut slot = self.shared.slot.lock();
    while matches!(*slot, Slot::Pending) {
      self.shared.ready.wait(&mut slot);
    }
    match std::mem::replace(&mut *slot, Slot::Ended) {
      Slot::Ready((result, buf)) => result.map(|value| (value, buf)),
      Slot::Ended => {
        Err(Error::InvalidState("operation has already been ended"))
      }
      Slot::Pending => unreachable!("waited for completion above"),
    }
  }
}

impl<T> std::fmt::Debug for AsyncResult<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AsyncResult")
      .field("stream_id", &self.shared.stream_id)
      .field("completed", &self.is_completed())
      .field("completed_synchronously", &self.completed_synchronously())
      .finish()
  }
}

const IDLE: u8 = 0;
const POLLING: u8 = 1;
const NOTIFIED: u8 = 2;
const DONE: u8 = 3;

/// Drives one operation to completion on the threads that wake it.
struct Task<T> {
  operation: Mutex<Option<Operation<T>>>,
  callback: Mutex<Option<Callback<T>>>,
  state: AtomicU8,
  result: AsyncResult<T>,
}

impl<T: Send + 'static> Task<T> {
  fn start(
    stream_id: u64,
    operation: Operation<T>,
    callback: Option<Callback<T>>,
  ) -> AsyncResult<T> {
    let result = AsyncResult::new(stream_id);
    let task = Arc::new(Task {
      operation: Mutex::new(Some(operation)),
      callback: Mutex::new(callback),
      state: AtomicU8::new(IDLE),
      result: result.clone(),
    });
    task.run(true);
    result
  }

  fn run(self: &Arc<Self>, inline: bool) {
    // Only one thread polls at a time. A wake that arrives mid-poll is left
    // as NOTIFIED for the polling thread to pick up.
    loop {
      match self.state.compare_exchange(
        IDLE,
        POLLING,
        Ordering::AcqRel,
        Ordering::Acquire,
      ) {
        Ok(_) => break,
        Err(POLLING) => {
          if self
            .state
            .compare_exchange(
              POLLING,
              NOTIFIED,
              Ordering::AcqRel,
              Ordering::Acquire,
            )
            .is_ok()
          {
            return;
          }
        }
        Err(_) => return,
      }
    }

    let waker = Waker::from(self.clone());
    let mut cx = Context::from_waker(&waker);

    loop {
      let polled = match self.operation.lock().as_mut() {
        Some(operation) => operation.as_mut().poll(&mut cx),
        None => return,
      };

      match polled {
        Poll::Ready(output) => {
          let finished = self.operation.lock().take();
          drop(finished);
          self.state.store(DONE, Ordering::Release);

          self.result.complete(output, inline);
          let callback = self.callback.lock().take();
          if let Some(callback) = callback {
            callback(&self.result);
          }
          return;
        }
        Poll::Pending => {
          if self
            .state
            .compare_exchange(POLLING, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
          {
            return;
          }
          // Woken while polling: go again.
          self.state.store(POLLING, Ordering::Release);
        }
      }
    }
  }
}

impl<T: Send + 'static> Wake for Task<T> {
  fn wake(self: Arc<Self>) {
    self.run(false);
  }

  fn wake_by_ref(self: &Arc<Self>) {
    self.run(false);
  }
}

impl<S: Stream + 'static> AsyncStream<S> {
  /// Starts an asynchronous read of up to `count` bytes into
  /// `buf[offset..offset + count]`. `callback` runs once it completes.
  pub fn begin_read(
    &self,
    buf: Vec<u8>,
    offset: usize,
    count: usize,
    callback: Option<Callback<usize>>,
  ) -> std::result::Result<AsyncResult<usize>, Rejected> {
    let operation =
      self.read_async(buf, offset, count, &CancellationToken::new())?;
    Ok(Task::start(self.id(), Box::pin(operation), callback))
  }

  /// Waits for a read started with [`AsyncStream::begin_read`] and returns
  /// the byte count together with the buffer.
  pub fn end_read(
    &self,
    result: &AsyncResult<usize>,
  ) -> Result<(usize, Vec<u8>)> {
    result.end(self.id())
  }

  pub fn begin_write(
    &self,
    buf: Vec<u8>,
    offset: usize,
    count: usize,
    callback: Option<Callback<()>>,
  ) -> std::result::Result<AsyncResult<()>, Rejected> {
    let operation =
      self.write_async(buf, offset, count, &CancellationToken::new())?;
    Ok(Task::start(self.id(), Box::pin(operation), callback))
  }

  pub fn end_write(&self, result: &AsyncResult<()>) -> Result<Vec<u8>> {
    result.end(self.id()).map(|((), buf)| buf)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::mpsc;

  use super::*;
  use crate::io::MemoryStream;

  #[test]
  fn begin_end_round_trip() {
    let stream = AsyncStream::new(MemoryStream::new());

    let write = stream.begin_write(b"data".to_vec(), 0, 4, None).unwrap();
    let buf = stream.end_write(&write).unwrap();
    assert_eq!(buf, b"data");
    assert!(write.is_completed());

    stream.lock_blocking().unwrap().set_position(0).unwrap();

    let read = stream.begin_read(vec![0u8; 4], 0, 4, None).unwrap();
    let (n, buf) = stream.end_read(&read).unwrap();
    assert_eq!(n, 4);
    assert_eq!(buf, b"data");
  }

  #[test]
  fn callback_runs_on_completion() {
    let stream = AsyncStream::new(MemoryStream::from(vec![9u8; 3]));
    let (tx, rx) = mpsc::channel();

    let read = stream
      .begin_read(
        vec![0u8; 3],
        0,
        3,
        Some(Box::new(move |result: &AsyncResult<usize>| {
          tx.send(result.is_completed()).unwrap();
        })),
      )
      .unwrap();

    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    assert!(read.wait_timeout(Duration::from_secs(5)));
    assert_eq!(stream.end_read(&read).unwrap().0, 3);
  }

  #[test]
  fn ending_twice_is_invalid() {
    let stream = AsyncStream::new(MemoryStream::new());
    let write = stream.begin_write(vec![1], 0, 1, None).unwrap();
    stream.end_write(&write).unwrap();
    assert!(matches!(stream.end_write(&write), Err(Error::InvalidState(_))));
  }

  #[test]
  fn foreign_handle_is_invalid() {
    let first = AsyncStream::new(MemoryStream::new());
    let second = AsyncStream::new(MemoryStream::new());

    let write = first.begin_write(vec![1], 0, 1, None).unwrap();
    assert!(matches!(second.end_write(&write), Err(Error::InvalidState(_))));
    // The rightful owner can still end it.
    assert!(first.end_write(&write).is_ok());
  }

  #[test]
  fn rejected_begin_returns_buffer() {
    let stream = AsyncStream::new(MemoryStream::new());
    let rejected = stream.begin_read(vec![0u8; 2], 0, 3, None).unwrap_err();
    assert!(matches!(rejected.error, Error::ArgumentInvalid { .. }));
    assert_eq!(rejected.buf.len(), 2);
  }
}
