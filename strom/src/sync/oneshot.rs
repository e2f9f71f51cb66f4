use std::{
  future::Future,
  mem,
  pin::Pin,
  task::{Context, Poll, Waker},
};

use thiserror::Error;

use crate::loom::sync::{Arc, Mutex};

enum State<V> {
  Init,
  Listening(Waker),
  Sent(V),
  Returned,
  ReceiverDropped,
  SenderDropped,
}

struct Inner<V> {
  state: Mutex<State<V>>,
}

/// Single-value channel. The blocking pool uses one per job to hand the
/// job's return value back to the awaiting caller.
pub fn channel<V>() -> (Sender<V>, Receiver<V>) {
  let inner = Arc::new(Inner { state: Mutex::new(State::Init) });

  (Sender { inner: Some(inner.clone()) }, Receiver { inner })
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("receiver dropped before the value was sent")]
pub struct ReceiverDroppedError;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("sender dropped without sending")]
pub struct SenderDroppedError;

pub struct Sender<V> {
  // Taken by `send`, so `Drop` only reports a sender that never sent.
  inner: Option<Arc<Inner<V>>>,
}

impl<V> Sender<V> {
  pub fn send(mut self, value: V) -> Result<(), ReceiverDroppedError> {
    let Some(inner) = self.inner.take() else {
      return Err(ReceiverDroppedError);
    };

    let mut state = inner.state.lock();
    match mem::replace(&mut *state, State::Sent(value)) {
      State::Init => Ok(()),
      State::Listening(waker) => {
        drop(state);
        waker.wake();
        Ok(())
      }
      previous => {
        // Receiver is gone; the value is dropped with the state.
        *state = previous;
        Err(ReceiverDroppedError)
      }
    }
  }
}

impl<V> Drop for Sender<V> {
  fn drop(&mut self) {
    let Some(inner) = self.inner.take() else {
      return;
    };

    let mut state = inner.state.lock();
    match mem::replace(&mut *state, State::SenderDropped) {
      State::Listening(waker) => {
        drop(state);
        waker.wake();
      }
      State::Init => {}
      previous => *state = previous,
    }
  }
}

pub struct Receiver<V> {
  inner: Arc<Inner<V>>,
}

impl<V> Receiver<V> {
  /// `Ok(None)` while nothing has been sent yet.
  pub fn try_recv(&self) -> Result<Option<V>, SenderDroppedError> {
    let mut state = self.inner.state.lock();
    match mem::replace(&mut *state, State::Returned) {
      State::Sent(value) => Ok(Some(value)),
      State::SenderDropped | State::Returned => {
        *state = State::SenderDropped;
        Err(SenderDroppedError)
      }
      previous => {
        *state = previous;
        Ok(None)
      }
    }
  }
}

impl<V> Future for Receiver<V> {
  type Output = Result<V, SenderDroppedError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut state = self.inner.state.lock();
    match mem::replace(&mut *state, State::Returned) {
      State::Sent(value) => Poll::Ready(Ok(value)),
      State::SenderDropped | State::Returned => {
        *state = State::SenderDropped;
        Poll::Ready(Err(SenderDroppedError))
      }
      State::Init | State::Listening(_) => {
        *state = State::Listening(cx.waker().clone());
        Poll::Pending
      }
      State::ReceiverDropped => unreachable!("receiver polled after drop"),
    }
  }
}

impl<V> Drop for Receiver<V> {
  fn drop(&mut self) {
    let mut state = self.inner.state.lock();
    if matches!(*state, State::Init | State::Listening(_)) {
      *state = State::ReceiverDropped;
    }
  }
}
