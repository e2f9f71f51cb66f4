//! Helpers for driving and combining futures without a runtime.

mod block_on;
mod or;

pub use block_on::block_on;
pub use or::Or;

use std::{future::Future, pin::Pin};

/// Boxed, sendable future borrowing for `'a`.
pub type IoFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Extension methods on every [`Future`].
pub trait FutureExt: Future {
  /// Resolves with whichever of `self` and `other` finishes first. `self` is
  /// polled first.
  fn or<F>(self, other: F) -> Or<Self, F, Self::Output>
  where
    Self: Sized,
    F: Future<Output = Self::Output>,
  {
    Or::new(self, other)
  }
}

impl<F: Future + ?Sized> FutureExt for F {}
