use std::{
  sync::{
    atomic::{AtomicUsize, Ordering},
    OnceLock,
  },
  thread,
  time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

const MAX_THREADS: usize = 500;
const KEEP_ALIVE: Duration = Duration::from_secs(5);

pub(crate) struct BlockingPool {
  queue: (Sender<Job>, Receiver<Job>),
  thread_state: ThreadState,
}

#[derive(Debug)]
struct ThreadState {
  threads_running: AtomicUsize,
  threads_busy: AtomicUsize,
  max_threads: usize,
}

impl BlockingPool {
  pub(super) fn get() -> &'static BlockingPool {
    static BLOCKING_POOL: OnceLock<BlockingPool> = OnceLock::new();
    BLOCKING_POOL.get_or_init(|| BlockingPool {
      thread_state: ThreadState {
        max_threads: MAX_THREADS,
        threads_busy: AtomicUsize::new(0),
        threads_running: AtomicUsize::new(0),
      },
      queue: crossbeam_channel::unbounded(),
    })
  }

  pub(super) fn insert(&'static self, job: Job) {
    // Queue first: a worker that is about to retire re-checks the queue
    // after deregistering, so one of the two sides always sees the job.
    let _ = self.queue.0.send(job);
    self.add_thread_if_needed();
  }

  fn add_thread_if_needed(&'static self) {
    let running = self.thread_state.threads_running.load(Ordering::SeqCst);
    let busy = self.thread_state.threads_busy.load(Ordering::SeqCst);
    let idle = running.saturating_sub(busy);

    if running >= self.thread_state.max_threads || self.queue.0.len() <= idle
    {
      return;
    }

    self.thread_state.threads_running.fetch_add(1, Ordering::SeqCst);
    let spawned = thread::Builder::new()
      .name("strom-blocking".into())
      .spawn(move || self.main_loop());

    match spawned {
      Ok(_) => {
        #[cfg(feature = "tracing")]
        tracing::trace!(threads = running + 1, "blocking pool: spawned worker");
      }
      Err(_err) => {
        self.thread_state.threads_running.fetch_sub(1, Ordering::SeqCst);
        #[cfg(feature = "tracing")]
        tracing::error!(error = %_err, "blocking pool: failed to spawn worker");
      }
    }
  }

  fn main_loop(&self) {
    loop {
      match self.queue.1.recv_timeout(KEEP_ALIVE) {
        Ok(job) => {
          self.thread_state.threads_busy.fetch_add(1, Ordering::SeqCst);
          job();
          self.thread_state.threads_busy.fetch_sub(1, Ordering::SeqCst);
        }
        Err(RecvTimeoutError::Timeout) => {
          self.thread_state.threads_running.fetch_sub(1, Ordering::SeqCst);
          if self.queue.1.is_empty() {
            break;
          }
          // A job slipped in while this thread was retiring.
          self.thread_state.threads_running.fetch_add(1, Ordering::SeqCst);
        }
        Err(RecvTimeoutError::Disconnected) => {
          self.thread_state.threads_running.fetch_sub(1, Ordering::SeqCst);
          break;
        }
      }
    }
  }
}
