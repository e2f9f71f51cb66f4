use std::{
  future::Future,
  sync::Arc,
  task::{Context, Poll, Wake, Waker},
};

use parking::{Parker, Unparker};

struct UnparkWaker(Unparker);

impl Wake for UnparkWaker {
  fn wake(self: Arc<Self>) {
    self.0.unpark();
  }

  fn wake_by_ref(self: &Arc<Self>) {
    self.0.unpark();
  }
}

/// Runs `fut` to completion on the current thread, parking between polls.
pub fn block_on<Fut>(fut: Fut) -> Fut::Output
where
  Fut: Future,
{
  let parker = Parker::new();
  let waker = Waker::from(Arc::new(UnparkWaker(parker.unparker())));
  let mut cx = Context::from_waker(&waker);
  let mut pinned = std::pin::pin!(fut);

  loop {
    match pinned.as_mut().poll(&mut cx) {
      Poll::Ready(value) => return value,
      Poll::Pending => parker.park(),
    };
  }
}

#[test]
fn wakes_from_another_thread() {
  let (sender, receiver) = crate::sync::oneshot::channel();

  let handle = std::thread::spawn(move || {
    std::thread::sleep(std::time::Duration::from_millis(10));
    sender.send("done").unwrap();
  });

  assert_eq!(block_on(receiver), Ok("done"));
  handle.join().unwrap();
}
