use std::{
  future::Future,
  num::NonZero,
  pin::Pin,
  task::{Context, Poll, Waker},
};

use indexmap::IndexMap;
use thiserror::Error;

use crate::loom::sync::{
  atomic::{AtomicUsize, Ordering},
  Mutex,
};

struct Waiters {
  // Insertion order is arrival order, so the head is the longest waiter.
  list: IndexMap<usize, Waker>,
  next_id: usize,
}

impl Waiters {
  fn new() -> Self {
    Self { list: IndexMap::new(), next_id: 0 }
  }

  fn issue_id(&mut self) -> usize {
    let id = self.next_id;
    self.next_id = self.next_id.wrapping_add(1);
    id
  }
}

/// Counting semaphore whose waiters are woken in arrival order.
pub struct Semaphore {
  permits: AtomicUsize,
  // This is not a bottleneck
  waiters: Mutex<Waiters>,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("no permits available")]
pub struct TryAcquireError;

impl Semaphore {
  pub fn with_size(size: NonZero<usize>) -> Self {
    Self {
      permits: AtomicUsize::new(size.get()),
      waiters: Mutex::new(Waiters::new()),
    }
  }

  pub fn available_permits(&self) -> usize {
    self.permits.load(Ordering::Acquire)
  }

  fn inner_try_acquire(&self) -> bool {
    let mut count = self.permits.load(Ordering::Acquire);

    loop {
      if count == 0 {
        return false;
      }

      match self.permits.compare_exchange_weak(
        count,
        count - 1,
        Ordering::AcqRel,
        Ordering::Acquire,
      ) {
        Ok(_) => return true,
        Err(new_count) => count = new_count,
      }
    }
  }

  pub fn try_acquire(&self) -> Result<AcquireLock<'_>, TryAcquireError> {
    if self.inner_try_acquire() {
      Ok(AcquireLock(self))
    } else {
      Err(TryAcquireError)
    }
  }

  pub fn acquire(&self) -> AcquireFuture<'_> {
    AcquireFuture { semaphore: self, waiter_id: None, acquired: false }
  }

  /// Returns one permit and wakes the longest waiter, if any.
  pub(crate) fn add_permit(&self) {
    self.permits.fetch_add(1, Ordering::AcqRel);
    self.wake_next();
  }

  fn wake_next(&self) {
    let waker = self.waiters.lock().list.shift_remove_index(0);
    if let Some((_, waker)) = waker {
      waker.wake();
    }
  }
}

pub struct AcquireFuture<'a> {
  semaphore: &'a Semaphore,
  waiter_id: Option<usize>,
  acquired: bool,
}

impl<'a> Future for AcquireFuture<'a> {
  type Output = AcquireLock<'a>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let semaphore = self.semaphore;

    if semaphore.inner_try_acquire() {
      if let Some(id) = self.waiter_id.take() {
        semaphore.waiters.lock().list.shift_remove(&id);
      }
      return Poll::Ready(self.complete());
    }

    let mut waiters = semaphore.waiters.lock();
    // A permit may have been returned between the attempt above and taking
    // the lock; releasers pick their waiter under the same lock, so checking
    // again here cannot miss a wakeup.
    if semaphore.inner_try_acquire() {
      if let Some(id) = self.waiter_id {
        waiters.list.shift_remove(&id);
      }
      drop(waiters);
      self.waiter_id = None;
      return Poll::Ready(self.complete());
    }

    let id = match self.waiter_id {
      Some(id) => id,
      None => {
        let id = waiters.issue_id();
        self.waiter_id = Some(id);
        id
      }
    };
    // Re-inserting an existing key keeps its place in the queue.
    waiters.list.insert(id, cx.waker().clone());

    Poll::Pending
  }
}

impl<'a> AcquireFuture<'a> {
  fn complete(&mut self) -> AcquireLock<'a> {
    self.acquired = true;
    AcquireLock(self.semaphore)
  }
}

impl Drop for AcquireFuture<'_> {
  fn drop(&mut self) {
    if self.acquired {
      return;
    }
    let Some(id) = self.waiter_id else {
      return;
    };

    let was_queued = self.semaphore.waiters.lock().list.shift_remove(&id);
    // Woken but never polled again: pass the wakeup on so the permit it was
    // meant for does not sit unclaimed.
    if was_queued.is_none() && self.semaphore.available_permits() > 0 {
      self.semaphore.wake_next();
    }
  }
}

pub struct AcquireLock<'a>(&'a Semaphore);

impl AcquireLock<'_> {
  pub fn release(self) {
    drop(self);
  }

  /// Keeps the permit taken without tying it to this guard's lifetime. The
  /// caller becomes responsible for [`Semaphore::add_permit`].
  pub(crate) fn forget(self) {
    std::mem::forget(self);
  }
}

impl Drop for AcquireLock<'_> {
  fn drop(&mut self) {
    self.0.add_permit();
  }
}
