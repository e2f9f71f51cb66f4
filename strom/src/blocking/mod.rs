pub(crate) mod pool;

use std::panic::{self, AssertUnwindSafe};

use pool::BlockingPool;

use crate::sync::oneshot;

/// Executes a blocking function on a dedicated thread pool and resolves with
/// its return value.
///
/// This is the building block of the stream adapter: a synchronous
/// `read`/`write` is moved onto a pool thread and the caller awaits the
/// result. Panics inside `f` are caught on the pool thread and resumed in the
/// awaiting task.
///
/// # Examples
///
/// ```rust
/// use strom::blocking;
///
/// let result = strom::future::block_on(blocking::unblock(|| {
///     std::thread::sleep(std::time::Duration::from_millis(10));
///     42
/// }));
/// assert_eq!(result, 42);
/// ```
pub async fn unblock<T, R>(f: T) -> R
where
  T: FnOnce() -> R + Send + 'static,
  R: 'static + Send,
{
  let (sender, receiver) = oneshot::channel();
  BlockingPool::get().insert(Box::new(move || {
    let outcome = panic::catch_unwind(AssertUnwindSafe(f));
    let _ = sender.send(outcome);
  }));

  match receiver.await {
    Ok(Ok(value)) => value,
    Ok(Err(payload)) => panic::resume_unwind(payload),
    // The pool only drops a job unrun when it could not start a thread.
    Err(_) => panic!("blocking pool dropped a job before running it"),
  }
}
