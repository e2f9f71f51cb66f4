mod common;

use std::{
  sync::{
    atomic::{AtomicUsize, Ordering},
    mpsc, Arc,
  },
  time::Duration,
};

use common::Recording;
use strom::{
  io::{AsyncStream, MemoryStream, SeekOrigin, Stream},
  Error,
};

#[test]
fn write_then_read_with_end_calls() {
  let stream = AsyncStream::new(MemoryStream::new());

  let write = stream.begin_write(b"begin/end".to_vec(), 0, 9, None).unwrap();
  assert_eq!(stream.end_write(&write).unwrap(), b"begin/end");
  assert!(write.is_completed());

  stream.lock_blocking().unwrap().seek(6, SeekOrigin::Begin).unwrap();

  let read = stream.begin_read(vec![0u8; 8], 2, 6, None).unwrap();
  let (n, buf) = stream.end_read(&read).unwrap();
  assert_eq!(n, 3);
  assert_eq!(&buf[2..5], b"end");
}

#[test]
fn callback_runs_once_with_a_completed_result() {
  let stream = AsyncStream::new(MemoryStream::from(b"callback".to_vec()));
  let calls = Arc::new(AtomicUsize::new(0));
  let (tx, rx) = mpsc::channel();

  let counted = calls.clone();
  let read = stream
    .begin_read(
      vec![0u8; 8],
      0,
      8,
      Some(Box::new(move |result| {
        counted.fetch_add(1, Ordering::SeqCst);
        tx.send(result.is_completed()).unwrap();
      })),
    )
    .unwrap();

  assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
  let (n, buf) = stream.end_read(&read).unwrap();
  assert_eq!(n, 8);
  assert_eq!(buf, b"callback");
  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn wait_blocks_until_done() {
  let (inner, _) = Recording::new(b"");
  let stream = AsyncStream::new(inner.slow(Duration::from_millis(20)));

  let write = stream.begin_write(vec![1u8; 32], 0, 32, None).unwrap();
  write.wait();
  assert!(write.is_completed());
  assert!(write.wait_timeout(Duration::ZERO));
  stream.end_write(&write).unwrap();
}

#[test]
fn ending_twice_is_invalid() {
  let stream = AsyncStream::new(MemoryStream::new());
  let write = stream.begin_write(b"x".to_vec(), 0, 1, None).unwrap();

  stream.end_write(&write).unwrap();
  assert!(matches!(stream.end_write(&write), Err(Error::InvalidState(_))));
}

#[test]
fn result_from_another_stream_is_invalid() {
  let first = AsyncStream::new(MemoryStream::new());
  let second = AsyncStream::new(MemoryStream::new());

  let write = first.begin_write(b"x".to_vec(), 0, 1, None).unwrap();
  assert!(matches!(second.end_write(&write), Err(Error::InvalidState(_))));

  // Clones share identity with the original.
  first.clone().end_write(&write).unwrap();
}

#[test]
fn failure_surfaces_at_end() {
  let (inner, calls) = Recording::new(b"");
  calls.fail_writes.store(true, Ordering::SeqCst);
  let failing = AsyncStream::new(inner);

  let write = failing.begin_write(b"lost".to_vec(), 0, 4, None).unwrap();
  assert!(matches!(failing.end_write(&write), Err(Error::Io { .. })));
  assert!(write.is_completed());
}

#[test]
fn invalid_begin_returns_the_buffer() {
  let stream = AsyncStream::new(MemoryStream::new());
  let rejected = stream.begin_read(vec![0u8; 2], 0, 3, None).err().unwrap();
  assert!(matches!(rejected.error, Error::ArgumentInvalid { .. }));
  assert_eq!(rejected.buf.len(), 2);
}
