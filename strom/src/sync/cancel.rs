use std::{
  future::Future,
  pin::Pin,
  task::{Context, Poll, Waker},
};

use indexmap::IndexMap;

use crate::loom::sync::{
  atomic::{AtomicBool, Ordering},
  Arc, Mutex,
};

/// Cooperative cancellation signal shared between a caller and the
/// operations it started.
///
/// Cloning yields another handle to the same signal. Cancelling is
/// permanent.
#[derive(Clone, Default)]
pub struct CancellationToken {
  inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
  cancelled: AtomicBool,
  waiters: Mutex<Waiters>,
}

#[derive(Default)]
struct Waiters {
  list: IndexMap<usize, Waker>,
  next_id: usize,
}

impl CancellationToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    if self.inner.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    let wakers = std::mem::take(&mut self.inner.waiters.lock().list);
    for (_, waker) in wakers {
      waker.wake();
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.cancelled.load(Ordering::Acquire)
  }

  /// Resolves once [`CancellationToken::cancel`] has been called.
  pub fn cancelled(&self) -> Cancelled<'_> {
    Cancelled { token: self, waiter_id: None }
  }
}

impl std::fmt::Debug for CancellationToken {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CancellationToken")
      .field("cancelled", &self.is_cancelled())
      .finish()
  }
}

pub struct Cancelled<'a> {
  token: &'a CancellationToken,
  waiter_id: Option<usize>,
}

impl Future for Cancelled<'_> {
  type Output = ();

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
    let token = self.token;
    if token.is_cancelled() {
      return Poll::Ready(());
    }

    let inner = &token.inner;
    let mut waiters = inner.waiters.lock();
    // `cancel` drains the list under this lock after setting the flag.
    if inner.cancelled.load(Ordering::Acquire) {
      return Poll::Ready(());
    }
    let id = match self.waiter_id {
      Some(id) => id,
      None => {
        let id = waiters.next_id;
        waiters.next_id = waiters.next_id.wrapping_add(1);
        id
      }
    };
    waiters.list.insert(id, cx.waker().clone());
    drop(waiters);
    self.waiter_id = Some(id);

    Poll::Pending
  }
}

impl Drop for Cancelled<'_> {
  fn drop(&mut self) {
    if let Some(id) = self.waiter_id {
      self.token.inner.waiters.lock().list.shift_remove(&id);
    }
  }
}
