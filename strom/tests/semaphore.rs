#![cfg(loom)]

use std::{future::Future, num::NonZero, pin::pin, task::Context};

use futures_task::noop_waker;
use loom::{
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  },
  thread,
};
use strom::sync::{CancellationToken, Mutex, Semaphore};

macro_rules! get_ready {
  ($expr:expr) => {{
    let mut pinned = pin!($expr);
    match pinned.as_mut().poll(&mut Context::from_waker(&noop_waker())) {
      std::task::Poll::Ready(value) => value,
      std::task::Poll::Pending => unreachable!("was Poll::Pending"),
    }
  }};
}

#[test]
fn permits_are_never_oversubscribed() {
  loom::model(|| {
    let semaphore = Arc::new(Semaphore::with_size(NonZero::new(1).unwrap()));
    let inside = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..2)
      .map(|_| {
        let semaphore = semaphore.clone();
        let inside = inside.clone();
        thread::spawn(move || {
          loom::future::block_on(async {
            let permit = semaphore.acquire().await;
            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
            inside.fetch_sub(1, Ordering::SeqCst);
            permit.release();
          })
        })
      })
      .collect();

    for worker in workers {
      worker.join().unwrap();
    }
    assert_eq!(semaphore.available_permits(), 1);
  })
}

#[test]
fn released_permit_reaches_the_waiter() {
  loom::model(|| {
    let semaphore = Arc::new(Semaphore::with_size(NonZero::new(1).unwrap()));
    let held = get_ready!(semaphore.acquire());

    let waiter = {
      let semaphore = semaphore.clone();
      thread::spawn(move || {
        loom::future::block_on(semaphore.acquire()).release();
      })
    };

    held.release();
    waiter.join().unwrap();
    assert_eq!(semaphore.available_permits(), 1);
  })
}

#[test]
fn cancel_wakes_a_parked_waiter() {
  loom::model(|| {
    let token = CancellationToken::new();

    let waiter = {
      let token = token.clone();
      thread::spawn(move || loom::future::block_on(token.cancelled()))
    };

    token.cancel();
    waiter.join().unwrap();
    assert!(token.is_cancelled());
  })
}

#[test]
fn mutex_hands_over_in_turn() {
  loom::model(|| {
    let mutex = Arc::new(Mutex::new(0usize));

    let workers: Vec<_> = (0..2)
      .map(|_| {
        let mutex = mutex.clone();
        thread::spawn(move || {
          loom::future::block_on(async {
            let mut value = mutex.lock().await.unwrap();
            *value += 1;
          })
        })
      })
      .collect();

    for worker in workers {
      worker.join().unwrap();
    }
    assert_eq!(*get_ready!(mutex.lock()).unwrap(), 2);
  })
}
