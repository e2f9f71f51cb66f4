//! Kernel-asynchronous reads and writes for file streams opened with
//! [`FileOptions::overlapped`](super::FileOptions::overlapped).
//!
//! Same buffering rules as the synchronous path; only the transfers to and
//! from the descriptor go through the io_uring driver.

use std::{io, os::fd::RawFd};

use super::{
  driver::{Driver, Op},
  file::FileStream,
};
use crate::{
  error::{BufResult, Error, Result},
  future::IoFuture,
  io::{buffer::WritePlan, Overlapped, Stream},
  sync::CancellationToken,
};

impl Overlapped for FileStream {
  fn read_overlapped(
    &mut self,
    buf: Vec<u8>,
    offset: usize,
    count: usize,
    cancel: CancellationToken,
  ) -> IoFuture<'_, BufResult<usize, Vec<u8>>> {
    Box::pin(async move {
      let driver = match self.begin_native(Access::Read) {
        Ok(driver) => driver,
        Err(err) => return (Err(err), buf),
      };
      let (result, buf) = self.read_native(driver, buf, offset, count, &cancel).await;
      (self.settle(result), buf)
    })
  }

  fn write_overlapped(
    &mut self,
    buf: Vec<u8>,
    offset: usize,
    count: usize,
    cancel: CancellationToken,
  ) -> IoFuture<'_, BufResult<(), Vec<u8>>> {
    Box::pin(async move {
      let driver = match self.begin_native(Access::Write) {
        Ok(driver) => driver,
        Err(err) => return (Err(err), buf),
      };
      let (result, buf) =
        self.write_native(driver, buf, offset, count, &cancel).await;
      (self.settle(result), buf)
    })
  }
}

#[derive(Clone, Copy)]
enum Access {
  Read,
  Write,
}

impl FileStream {
  fn begin_native(&mut self, access: Access) -> Result<&'static Driver> {
    self.enter()?;
    let allowed = match access {
      Access::Read => self.can_read(),
      Access::Write => self.can_write(),
    };
    if !allowed {
      return Err(Error::UnsupportedOperation(match access {
        Access::Read => "stream does not support reading",
        Access::Write => "stream does not support writing",
      }));
    }
    self
      .driver
      .ok_or(Error::UnsupportedOperation("stream was not opened overlapped"))
  }

  fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
    let settled = self.leave();
    result.and_then(|value| settled.map(|()| value))
  }

  async fn read_native(
    &mut self,
    driver: &'static Driver,
    buf: Vec<u8>,
    offset: usize,
    count: usize,
    cancel: &CancellationToken,
  ) -> BufResult<usize, Vec<u8>> {
    let mut buf = buf;
    if count == 0 {
      return (Ok(0), buf);
    }

    let (raw, state) = self.inner_mut().parts_mut();

    let from_buffer = state.read_from_buffer(&mut buf[offset..offset + count]);
    if from_buffer > 0 {
      return (Ok(from_buffer), buf);
    }
    state.clear_read();

    let fd = raw.handle.raw();

    if state.has_pending_write() {
      let pending = state.pending_write().to_vec();
      let len = pending.len();
      let (result, _) = write_all_at(driver, fd, raw.pos, pending, 0, len, cancel).await;
      if let Err(err) = result {
        return (Err(raw.handle.fault(err)), buf);
      }
      raw.pos += len as u64;
      state.mark_written();
    }

    if count >= state.buffer_size() {
      let (result, buf) =
        driver.run(Op::Read, fd, raw.pos, buf, offset, count, cancel).await;
      return match result {
        Ok(n) => {
          raw.pos += n as u64;
          (Ok(n), buf)
        }
        Err(err) => (Err(raw.handle.fault(err)), buf),
      };
    }

    let block = state.take();
    let len = block.len();
    let (result, block) =
      driver.run(Op::Read, fd, raw.pos, block, 0, len, cancel).await;
    // A block the driver could not hand back is reallocated on next use.
    if block.len() == len {
      state.restore(block);
    }

    match result {
      Ok(filled) => {
        raw.pos += filled as u64;
        state.set_filled(filled);
        let n = state.read_from_buffer(&mut buf[offset..offset + count]);
        (Ok(n), buf)
      }
      Err(err) => (Err(raw.handle.fault(err)), buf),
    }
  }

  async fn write_native(
    &mut self,
    driver: &'static Driver,
    buf: Vec<u8>,
    offset: usize,
    count: usize,
    cancel: &CancellationToken,
  ) -> BufResult<(), Vec<u8>> {
    if count == 0 {
      return (Ok(()), buf);
    }

    if let Err(err) = self.inner_mut().clear_read_before_write() {
      return (Err(err), buf);
    }

    let (raw, state) = self.inner_mut().parts_mut();
    let fd = raw.handle.raw();

    match state.plan_write(count) {
      WritePlan::Buffer => {
        let room = state.buffer_size() - state.write_pos();
        if count < room {
          state.write_to_buffer(&buf[offset..offset + count]);
          return (Ok(()), buf);
        }

        // The buffer fills up. Nothing of the caller's is buffered until the
        // full block is on disk, so a dropped future leaves no trace.
        let block = state.shadow_with(&buf[offset..offset + room]);
        let len = block.len();
        let (result, _) =
          write_all_at(driver, fd, raw.pos, block, 0, len, cancel).await;
        if let Err(err) = result {
          return (Err(raw.handle.fault(err)), buf);
        }
        raw.pos += len as u64;
        state.mark_written();
        state.write_to_buffer(&buf[offset + room..offset + count]);
        (Ok(()), buf)
      }
      WritePlan::Shadow => {
        let shadow = state.shadow_with(&buf[offset..offset + count]);
        let len = shadow.len();
        let (result, _) =
          write_all_at(driver, fd, raw.pos, shadow, 0, len, cancel).await;
        if let Err(err) = result {
          return (Err(raw.handle.fault(err)), buf);
        }
        raw.pos += len as u64;
        state.mark_written();
        (Ok(()), buf)
      }
      WritePlan::Direct => {
        if state.has_pending_write() {
          let pending = state.pending_write().to_vec();
          let len = pending.len();
          let (result, _) =
            write_all_at(driver, fd, raw.pos, pending, 0, len, cancel).await;
          if let Err(err) = result {
            return (Err(raw.handle.fault(err)), buf);
          }
          raw.pos += len as u64;
          state.mark_written();
        }

        let (result, buf) =
          write_all_at(driver, fd, raw.pos, buf, offset, count, cancel).await;
        match result {
          Ok(()) => {
            raw.pos += count as u64;
            (Ok(()), buf)
          }
          Err(err) => (Err(raw.handle.fault(err)), buf),
        }
      }
    }
  }
}

/// Writes `buf[start..start + len]` at `offset`, resubmitting after short
/// writes.
async fn write_all_at(
  driver: &'static Driver,
  fd: RawFd,
  mut offset: u64,
  mut buf: Vec<u8>,
  mut start: usize,
  mut len: usize,
  cancel: &CancellationToken,
) -> (io::Result<()>, Vec<u8>) {
  while len > 0 {
    let (result, back) =
      driver.run(Op::Write, fd, offset, buf, start, len, cancel).await;
    buf = back;
    match result {
      Ok(0) => return (Err(io::ErrorKind::WriteZero.into()), buf),
      Ok(n) => {
        start += n;
        len -= n;
        offset += n as u64;
      }
      Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
      Err(err) => return (Err(err), buf),
    }
  }
  (Ok(()), buf)
}

#[cfg(test)]
mod tests {
  use std::{future::Future, task::Context};

  use futures_task::noop_waker;

  use super::*;
  use crate::{
    fs::{FileAccess, FileOptions},
    future::block_on,
    io::{AsyncStream, SeekOrigin},
  };

  fn overlapped(buffer_size: usize) -> Option<FileStream> {
    let file = tempfile::tempfile().unwrap();
    let stream = FileStream::from_fd(
      file.into(),
      &FileOptions::new()
        .access(FileAccess::ReadWrite)
        .buffer_size(buffer_size)
        .overlapped(true),
    )
    .unwrap();
    // Kernels without io_uring fall back to the blocking pool.
    stream.is_overlapped().then_some(stream)
  }

  #[test]
  fn native_writes_coalesce_like_sync_ones() {
    let Some(mut stream) = overlapped(4) else {
      return;
    };
    let token = CancellationToken::new();

    block_on(async {
      let (result, _) =
        stream.write_overlapped(b"AB".to_vec(), 0, 2, token.clone()).await;
      result.unwrap();
      assert_eq!(stream.inner_mut().pending(), 2);

      let (result, _) =
        stream.write_overlapped(b"CDEF".to_vec(), 0, 4, token.clone()).await;
      result.unwrap();
      assert_eq!(stream.inner_mut().pending(), 0);
    });

    assert_eq!(stream.position().unwrap(), 6);
    assert_eq!(stream.length().unwrap(), 6);
  }

  #[test]
  fn native_read_sees_sync_writes() {
    let Some(mut stream) = overlapped(8) else {
      return;
    };
    stream.write(b"hello world").unwrap();
    stream.seek(6, SeekOrigin::Begin).unwrap();

    let (result, buf) = block_on(stream.read_overlapped(
      vec![0u8; 5],
      0,
      5,
      CancellationToken::new(),
    ));
    assert_eq!(result.unwrap(), 5);
    assert_eq!(&buf, b"world");
    assert_eq!(stream.position().unwrap(), 11);
  }

  #[test]
  fn adapter_prefers_native_path() {
    let Some(stream) = overlapped(16) else {
      return;
    };
    let stream = AsyncStream::new(stream);
    let token = CancellationToken::new();

    block_on(async {
      let data = vec![7u8; 64];
      let (result, _) = stream.write_async(data, 0, 64, &token).unwrap().await;
      result.unwrap();

      stream.lock().await.unwrap().seek(0, SeekOrigin::Begin).unwrap();

      let (result, buf) =
        stream.read_async(vec![0u8; 64], 0, 64, &token).unwrap().await;
      assert_eq!(result.unwrap(), 64);
      assert!(buf.iter().all(|&b| b == 7));
    });
  }

  #[test]
  fn dropped_write_leaves_no_pending_bytes() {
    let Some(mut stream) = overlapped(4) else {
      return;
    };
    let (result, _) = block_on(stream.write_overlapped(
      b"AB".to_vec(),
      0,
      2,
      CancellationToken::new(),
    ));
    result.unwrap();

    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    let mut write =
      stream.write_overlapped(b"CD".to_vec(), 0, 2, CancellationToken::new());
    let finished = write.as_mut().poll(&mut cx).is_ready();
    drop(write);

    if finished {
      // The kernel beat the first poll; the write went through normally.
      assert_eq!(stream.inner_mut().pending(), 0);
      assert_eq!(stream.position().unwrap(), 4);
      return;
    }
    assert_eq!(stream.inner_mut().pending(), 2);
    assert_eq!(stream.position().unwrap(), 2);
  }

  #[test]
  fn cancelled_before_start_moves_nothing() {
    let Some(mut stream) = overlapped(4) else {
      return;
    };
    let token = CancellationToken::new();
    token.cancel();

    let (result, _) =
      block_on(stream.write_overlapped(b"abcdefgh".to_vec(), 0, 8, token));
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(stream.position().unwrap(), 0);
    assert_eq!(stream.length().unwrap(), 0);
  }
}
