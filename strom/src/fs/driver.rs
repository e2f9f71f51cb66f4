//! Process-wide io_uring instance backing overlapped file streams.
//!
//! Submitters push entries under `submission_guard`; a single background
//! thread owns the completion queue, records each result against the
//! operation's `user_data` and wakes whoever is waiting. Buffers handed to
//! the kernel live in the operation table until their completion arrives,
//! even if the future that submitted them is dropped first.

use std::{
  future::Future,
  io,
  os::fd::RawFd,
  pin::{pin, Pin},
  sync::{
    atomic::{AtomicU64, Ordering},
    OnceLock,
  },
  task::{Context, Poll, Waker},
  thread,
};

use dashmap::DashMap;
use io_uring::{cqueue, opcode, squeue, types, IoUring, Probe};
use parking_lot::Mutex;

use crate::sync::CancellationToken;

const ENTRIES: u32 = 256;

/// `user_data` of cancel requests. Their completions carry no payload.
const CANCEL_TAG: u64 = u64::MAX;

pub(crate) struct Driver {
  ring: IoUring,
  submission_guard: Mutex<()>,
  ops: DashMap<u64, Slot>,
  next_id: AtomicU64,
}

enum Slot {
  Waiting { waker: Option<Waker>, buf: Vec<u8> },
  Done { res: i32, buf: Vec<u8> },
  /// The submitter went away; the buffer is held until the kernel is done.
  Detached { _buf: Vec<u8> },
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Op {
  Read,
  Write,
}

impl Driver {
  /// The shared driver, started on first use. `None` when io_uring is
  /// unavailable or lacks an opcode overlapped streams need.
  pub(crate) fn get() -> Option<&'static Driver> {
    static DRIVER: OnceLock<Option<&'static Driver>> = OnceLock::new();

    *DRIVER.get_or_init(|| match Driver::start() {
      Ok(driver) => Some(driver),
      Err(_err) => {
        #[cfg(feature = "tracing")]
        tracing::warn!(
          error = %_err,
          "uring driver: unavailable, overlapped streams fall back to the blocking pool"
        );
        None
      }
    })
  }

  fn start() -> io::Result<&'static Driver> {
    let ring = IoUring::new(ENTRIES)?;

    let mut probe = Probe::new();
    ring.submitter().register_probe(&mut probe)?;
    let supported = probe.is_supported(opcode::Read::CODE)
      && probe.is_supported(opcode::Write::CODE)
      && probe.is_supported(opcode::AsyncCancel::CODE);
    if !supported {
      return Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "kernel lacks READ, WRITE or ASYNC_CANCEL",
      ));
    }

    let driver: &'static Driver = Box::leak(Box::new(Driver {
      ring,
      submission_guard: Mutex::new(()),
      ops: DashMap::with_capacity(ENTRIES as usize),
      next_id: AtomicU64::new(0),
    }));

    thread::Builder::new()
      .name("strom-uring".into())
      .spawn(move || driver.complete_loop())?;

    #[cfg(feature = "tracing")]
    tracing::debug!(entries = ENTRIES, "uring driver: started");

    Ok(driver)
  }

  fn complete_loop(&'static self) {
    loop {
      match self.ring.submit_and_wait(1) {
        Ok(_) => {}
        Err(err)
          if matches!(err.raw_os_error(), Some(libc::EINTR | libc::EBUSY)) => {}
        Err(_err) => {
          #[cfg(feature = "tracing")]
          tracing::error!(error = %_err, "uring driver: submit_and_wait failed");
          thread::yield_now();
          continue;
        }
      }

      // Safety: this thread is the only one touching the completion queue.
      let entries: Vec<cqueue::Entry> =
        unsafe { self.ring.completion_shared() }.collect();

      for entry in entries {
        self.complete(entry.user_data(), entry.result());
      }
    }
  }

  fn complete(&self, id: u64, res: i32) {
    if id == CANCEL_TAG {
      return;
    }

    let waker = {
      let Some(mut slot) = self.ops.get_mut(&id) else {
        return;
      };
      match std::mem::replace(&mut *slot, Slot::Done { res, buf: Vec::new() })
      {
        Slot::Waiting { waker, buf } => {
          *slot = Slot::Done { res, buf };
          waker
        }
        Slot::Detached { .. } => {
          drop(slot);
          self.ops.remove(&id);
          None
        }
        done @ Slot::Done { .. } => {
          *slot = done;
          None
        }
      }
    };

    if let Some(waker) = waker {
      waker.wake();
    }
  }

  fn push(&self, entry: &squeue::Entry) -> io::Result<()> {
    let guard = self.submission_guard.lock();
    // Safety: `submission_guard` serializes every producer.
    let pushed = unsafe {
      let mut queue = self.ring.submission_shared();
      let pushed = queue.push(entry);
      queue.sync();
      pushed
    };
    drop(guard);

    if pushed.is_err() {
      // Queue full: hand what is queued to the kernel and try once more.
      self.ring.submit()?;
      let _guard = self.submission_guard.lock();
      unsafe {
        let mut queue = self.ring.submission_shared();
        queue.push(entry).map_err(|_| {
          io::Error::new(io::ErrorKind::WouldBlock, "submission queue is full")
        })?;
        queue.sync();
      }
    }

    self.ring.submit()?;
    Ok(())
  }

  fn submit(
    &'static self,
    op: Op,
    fd: RawFd,
    offset: u64,
    mut buf: Vec<u8>,
    start: usize,
    len: usize,
  ) -> Result<OpFuture, (io::Error, Vec<u8>)> {
    debug_assert!(start + len <= buf.len());
    let len = len.min(u32::MAX as usize) as u32;
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);

    // Safety: `start + len` lies inside `buf`, whose heap allocation stays
    // put while the Vec sits in `ops`.
    let entry = unsafe {
      match op {
        Op::Read => opcode::Read::new(
          types::Fd(fd),
          buf.as_mut_ptr().add(start),
          len,
        )
        .offset(offset)
        .build(),
        Op::Write => {
          opcode::Write::new(types::Fd(fd), buf.as_ptr().add(start), len)
            .offset(offset)
            .build()
        }
      }
    }
    .user_data(id);

    self.ops.insert(id, Slot::Waiting { waker: None, buf });

    if let Err(err) = self.push(&entry) {
      let buf = match self.ops.remove(&id) {
        Some((_, Slot::Waiting { buf, .. })) => buf,
        _ => Vec::new(),
      };
      return Err((err, buf));
    }

    #[cfg(feature = "tracing")]
    tracing::trace!(id, ?op, fd, offset, len, "uring driver: submitted");

    Ok(OpFuture { driver: self, id, finished: false })
  }

  fn cancel(&self, id: u64) {
    let entry = opcode::AsyncCancel::new(id).build().user_data(CANCEL_TAG);
    if let Err(_err) = self.push(&entry) {
      #[cfg(feature = "tracing")]
      tracing::warn!(id, error = %_err, "uring driver: cancel submission failed");
    }
  }

  /// Runs one read or write at `offset` against `buf[start..start + len]`.
  ///
  /// Nothing is submitted if `cancel` has already fired. A cancellation
  /// while the request is in flight asks the kernel to abandon it; the
  /// result is then `ECANCELED`, or the real outcome if the kernel had
  /// already finished.
  #[allow(clippy::too_many_arguments)]
  pub(crate) async fn run(
    &'static self,
    op: Op,
    fd: RawFd,
    offset: u64,
    buf: Vec<u8>,
    start: usize,
    len: usize,
    cancel: &CancellationToken,
  ) -> (io::Result<usize>, Vec<u8>) {
    if cancel.is_cancelled() {
      return (Err(io::Error::from_raw_os_error(libc::ECANCELED)), buf);
    }

    let mut op = match self.submit(op, fd, offset, buf, start, len) {
      Ok(op) => op,
      Err((err, buf)) => return (Err(err), buf),
    };

    let mut cancelled = pin!(cancel.cancelled());
    let mut cancel_sent = false;

    std::future::poll_fn(|cx| {
      if let Poll::Ready(output) = Pin::new(&mut op).poll(cx) {
        return Poll::Ready(output);
      }
      if !cancel_sent && cancelled.as_mut().poll(cx).is_ready() {
        cancel_sent = true;
        self.cancel(op.id);
      }
      Poll::Pending
    })
    .await
  }
}

/// Resolves with a submitted operation's result and buffer.
pub(crate) struct OpFuture {
  driver: &'static Driver,
  id: u64,
  finished: bool,
}

impl Future for OpFuture {
  type Output = (io::Result<usize>, Vec<u8>);

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let (driver, id) = (self.driver, self.id);
    let Some(mut slot) = driver.ops.get_mut(&id) else {
      self.finished = true;
      return Poll::Ready((
        Err(io::Error::new(io::ErrorKind::Other, "operation lost by driver")),
        Vec::new(),
      ));
    };

    match &mut *slot {
      Slot::Waiting { waker, .. } => {
        match waker {
          Some(existing) if existing.will_wake(cx.waker()) => {}
          _ => *waker = Some(cx.waker().clone()),
        }
        Poll::Pending
      }
      Slot::Done { .. } => {
        drop(slot);
        self.finished = true;
        match driver.ops.remove(&id) {
          Some((_, Slot::Done { res, buf })) => {
            let result = if res < 0 {
              Err(io::Error::from_raw_os_error(-res))
            } else {
              Ok(res as usize)
            };
            Poll::Ready((result, buf))
          }
          _ => unreachable!("completed slot changed while removing it"),
        }
      }
      Slot::Detached { .. } => unreachable!("detached slot polled"),
    }
  }
}

impl Drop for OpFuture {
  fn drop(&mut self) {
    if self.finished {
      return;
    }

    let detached = match self.driver.ops.get_mut(&self.id) {
      Some(mut slot) => match std::mem::replace(
        &mut *slot,
        Slot::Detached { _buf: Vec::new() },
      ) {
        Slot::Waiting { buf, .. } => {
          *slot = Slot::Detached { _buf: buf };
          true
        }
        // Completed but never collected.
        _ => {
          drop(slot);
          self.driver.ops.remove(&self.id);
          false
        }
      },
      None => false,
    };

    if detached {
      self.driver.cancel(self.id);
    }
  }
}
