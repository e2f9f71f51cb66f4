#![allow(unused_imports)]

pub(crate) mod sync {
  #[cfg(loom)]
  pub(crate) use loom::sync::Arc;
  #[cfg(not(loom))]
  pub(crate) use std::sync::Arc;

  // Poison-free lock. parking_lot in regular builds, loom's model under loom.
  pub(crate) struct Mutex<T> {
    #[cfg(not(loom))]
    inner: parking_lot::Mutex<T>,
    #[cfg(loom)]
    inner: loom::sync::Mutex<T>,
  }

  impl<T> Mutex<T> {
    pub(crate) fn new(value: T) -> Self {
      Self {
        inner: {
          #[cfg(not(loom))]
          {
            parking_lot::Mutex::new(value)
          }
          #[cfg(loom)]
          {
            loom::sync::Mutex::new(value)
          }
        },
      }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
      #[cfg(not(loom))]
      {
        MutexGuard { inner: self.inner.lock() }
      }
      #[cfg(loom)]
      {
        MutexGuard {
          inner: self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()),
        }
      }
    }
  }

  impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
      Self::new(T::default())
    }
  }

  pub(crate) struct MutexGuard<'a, T> {
    #[cfg(not(loom))]
    inner: parking_lot::MutexGuard<'a, T>,
    #[cfg(loom)]
    inner: loom::sync::MutexGuard<'a, T>,
  }

  impl<T> std::ops::Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
      &self.inner
    }
  }

  impl<T> std::ops::DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
      &mut self.inner
    }
  }

  pub(crate) mod atomic {
    #[cfg(loom)]
    pub(crate) use loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    #[cfg(not(loom))]
    pub(crate) use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  }
}
