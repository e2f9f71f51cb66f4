use std::{
  cell::UnsafeCell,
  num::NonZero,
  ops::{Deref, DerefMut},
  panic::{RefUnwindSafe, UnwindSafe},
};

use thiserror::Error;

use super::semaphore::{AcquireLock, Semaphore};
use crate::loom::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Binary async mutex.
///
/// Waiting callers queue in arrival order. Guards can be borrowed
/// ([`Mutex::lock`]) or owned ([`Mutex::lock_owned`]); an owned guard may be
/// moved to another thread and released there, which is how a background job
/// keeps a stream locked until the job itself finishes.
pub struct Mutex<T> {
  inner: UnsafeCell<T>,
  poisoned: AtomicBool,
  guard: Semaphore,
}

// Safety: Mutex logic makes sure this is safe.
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> UnwindSafe for Mutex<T> {}
impl<T> RefUnwindSafe for Mutex<T> {}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("mutex poisoned by a panicking holder")]
pub struct PoisonError;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TryLockError {
  #[error("Unable to acquire lock")]
  UnableToAcquireLock,
  #[error(transparent)]
  Poisoned(#[from] PoisonError),
}

impl<T> Mutex<T> {
  pub fn new(value: T) -> Self {
    Self {
      inner: UnsafeCell::new(value),
      guard: Semaphore::with_size(NonZero::<usize>::MIN),
      poisoned: AtomicBool::new(false),
    }
  }

  pub fn poison(&self) {
    self.poisoned.store(true, Ordering::Release);
  }

  pub fn is_poisoned(&self) -> bool {
    self.poisoned.load(Ordering::Acquire)
  }

  pub fn is_locked(&self) -> bool {
    self.guard.available_permits() == 0
  }

  pub async fn lock(&self) -> Result<MutexGuard<'_, T>, PoisonError> {
    if self.is_poisoned() {
      return Err(PoisonError);
    }
    let guard = self.guard.acquire().await;
    Ok(MutexGuard(self, guard))
  }

  /// Like [`Mutex::lock`], but the guard keeps the mutex alive through the
  /// `Arc` and carries no lifetime.
  pub async fn lock_owned(
    self: Arc<Self>,
  ) -> Result<OwnedMutexGuard<T>, PoisonError> {
    if self.is_poisoned() {
      return Err(PoisonError);
    }
    self.guard.acquire().await.forget();
    Ok(OwnedMutexGuard { mutex: self })
  }

  pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, TryLockError> {
    if self.is_poisoned() {
      return Err(PoisonError.into());
    }
    let guard =
      self.guard.try_acquire().map_err(|_| TryLockError::UnableToAcquireLock);
    guard.map(|guard| MutexGuard(self, guard))
  }

  /// Blocks the calling thread until the lock is held.
  pub fn lock_blocking(&self) -> Result<MutexGuard<'_, T>, PoisonError> {
    crate::future::block_on(self.lock())
  }

  pub fn into_inner(self) -> T {
    self.inner.into_inner()
  }

  pub fn get_mut(&mut self) -> &mut T {
    self.inner.get_mut()
  }
}

pub struct MutexGuard<'a, T>(&'a Mutex<T>, AcquireLock<'a>);

impl<T> Deref for MutexGuard<'_, T> {
  type Target = T;
  fn deref(&self) -> &Self::Target {
    unsafe { &*self.0.inner.get() }
  }
}

impl<T> DerefMut for MutexGuard<'_, T> {
  fn deref_mut(&mut self) -> &mut Self::Target {
    unsafe { &mut *self.0.inner.get() }
  }
}

impl<T> MutexGuard<'_, T> {
  pub fn release(self) {
    drop(self);
  }
}

impl<T> Drop for MutexGuard<'_, T> {
  fn drop(&mut self) {
    if std::thread::panicking() {
      self.0.poison();
    }
    // Field `1` returns the permit when it drops.
  }
}

pub struct OwnedMutexGuard<T> {
  mutex: Arc<Mutex<T>>,
}

impl<T> OwnedMutexGuard<T> {
  pub fn mutex(&self) -> &Arc<Mutex<T>> {
    &self.mutex
  }
}

impl<T> Deref for OwnedMutexGuard<T> {
  type Target = T;
  fn deref(&self) -> &Self::Target {
    unsafe { &*self.mutex.inner.get() }
  }
}

impl<T> DerefMut for OwnedMutexGuard<T> {
  fn deref_mut(&mut self) -> &mut Self::Target {
    unsafe { &mut *self.mutex.inner.get() }
  }
}

impl<T> Drop for OwnedMutexGuard<T> {
  fn drop(&mut self) {
    if std::thread::panicking() {
      self.mutex.poison();
    }
    self.mutex.guard.add_permit();
  }
}
