mod common;

use std::sync::{atomic::Ordering, Arc};

use common::{Calls, Recording};
use strom::{
  io::{
    BufferedStream, BufferedStreamBuilder, MemoryStream, NullStream, SeekOrigin,
    Stream,
  },
  Error,
};

fn buffered(data: &[u8], size: usize) -> (BufferedStream<Recording>, Arc<Calls>) {
  common::init_tracing();
  let (inner, calls) = Recording::new(data);
  let stream =
    BufferedStreamBuilder::new().buffer_size(size).build(inner).unwrap();
  (stream, calls)
}

#[test]
fn pending_and_new_bytes_go_out_together() {
  let (mut stream, calls) = buffered(b"", 4);

  stream.write(b"AB").unwrap();
  assert!(calls.writes().is_empty());
  assert_eq!(stream.pending(), 2);

  stream.write(b"CDEF").unwrap();
  assert_eq!(calls.writes(), vec![6]);
  assert_eq!(stream.pending(), 0);

  stream.flush().unwrap();
  assert_eq!(calls.writes(), vec![6]);
  assert_eq!(stream.get_ref().data(), b"ABCDEF");
}

#[test]
fn small_writes_coalesce_until_flush() {
  let (mut stream, calls) = buffered(b"", 8);

  stream.write(b"abc").unwrap();
  stream.write(b"def").unwrap();
  assert!(calls.writes().is_empty());
  assert_eq!(stream.position().unwrap(), 6);

  stream.flush().unwrap();
  assert_eq!(calls.writes(), vec![6]);
  assert_eq!(calls.flushes.load(Ordering::SeqCst), 1);
}

#[test]
fn filling_the_buffer_writes_it_out() {
  let (mut stream, calls) = buffered(b"", 4);

  stream.write(b"AB").unwrap();
  stream.write(b"CD").unwrap();
  assert_eq!(calls.writes(), vec![4]);
  assert_eq!(stream.pending(), 0);
}

#[test]
fn large_writes_bypass_the_buffer() {
  let (mut stream, calls) = buffered(b"", 4);

  stream.write(b"0123456789").unwrap();
  assert_eq!(calls.writes(), vec![10]);

  stream.write(b"AB").unwrap();
  stream.write(b"0123456").unwrap();
  // Too large to coalesce: pending first, then the caller's bytes.
  assert_eq!(calls.writes(), vec![10, 2, 7]);
  assert_eq!(stream.get_ref().data(), b"0123456789AB0123456");
}

#[test]
fn shadow_limit_disables_coalescing() {
  common::init_tracing();
  let (inner, calls) = Recording::new(b"");
  let mut stream = BufferedStreamBuilder::new()
    .buffer_size(4)
    .shadow_limit(4)
    .build(inner)
    .unwrap();

  stream.write(b"AB").unwrap();
  stream.write(b"CDEF").unwrap();
  assert_eq!(calls.writes(), vec![2, 4]);
}

#[test]
fn failed_write_out_keeps_position() {
  let (mut stream, calls) = buffered(b"", 4);

  stream.write(b"AB").unwrap();
  calls.fail_writes.store(true, Ordering::SeqCst);
  assert!(matches!(stream.write(b"CD"), Err(Error::Io { .. })));
  assert_eq!(stream.pending(), 2);
  assert_eq!(stream.position().unwrap(), 2);

  calls.fail_writes.store(false, Ordering::SeqCst);
  stream.flush().unwrap();
  assert_eq!(stream.get_ref().data(), b"AB");
}

#[test]
fn read_ahead_serves_small_reads() {
  let (mut stream, calls) = buffered(b"0123456789", 4);

  let mut one = [0u8; 1];
  stream.read(&mut one).unwrap();
  assert_eq!(calls.reads(), 1);
  assert_eq!(stream.unconsumed(), 3);

  let mut three = [0u8; 3];
  assert_eq!(stream.read(&mut three).unwrap(), 3);
  assert_eq!(&three, b"123");
  assert_eq!(calls.reads(), 1);
}

#[test]
fn read_spanning_the_buffer_continues_below() {
  let (mut stream, _) = buffered(b"0123456789", 4);

  let mut one = [0u8; 1];
  stream.read(&mut one).unwrap();

  let mut rest = [0u8; 6];
  assert_eq!(stream.read(&mut rest).unwrap(), 6);
  assert_eq!(&rest, b"123456");
  assert_eq!(stream.position().unwrap(), 7);
}

#[test]
fn failed_refill_is_reported_and_keeps_drained_bytes() {
  let (mut stream, calls) = buffered(b"0123456789", 4);

  let mut two = [0u8; 2];
  assert_eq!(stream.read(&mut two).unwrap(), 2);

  calls.fail_reads.store(true, Ordering::SeqCst);
  let mut three = [0u8; 3];
  assert!(matches!(stream.read(&mut three), Err(Error::Io { .. })));
  assert_eq!(stream.unconsumed(), 2);
  assert_eq!(stream.position().unwrap(), 2);

  calls.fail_reads.store(false, Ordering::SeqCst);
  assert_eq!(stream.read(&mut three).unwrap(), 3);
  assert_eq!(&three, b"234");
  assert_eq!(stream.position().unwrap(), 5);
}

#[test]
fn seek_inside_read_ahead_skips_the_inner_read() {
  let (mut stream, calls) = buffered(b"0123456789", 8);

  stream.read_byte().unwrap();
  stream.seek(2, SeekOrigin::Current).unwrap();
  assert_eq!(stream.read_byte().unwrap(), Some(b'3'));
  stream.seek(1, SeekOrigin::Begin).unwrap();
  assert_eq!(stream.read_byte().unwrap(), Some(b'1'));
  assert_eq!(calls.reads(), 1);

  stream.seek(9, SeekOrigin::Begin).unwrap();
  assert_eq!(stream.read_byte().unwrap(), Some(b'9'));
  assert_eq!(calls.reads(), 2);
}

#[test]
fn write_after_read_ahead_on_unseekable_stream() {
  common::init_tracing();
  let (inner, _) = Recording::new(b"0123456789");
  let mut stream = BufferedStreamBuilder::new()
    .buffer_size(4)
    .build(inner.unseekable())
    .unwrap();

  stream.read_byte().unwrap();
  assert!(matches!(
    stream.write(b"x"),
    Err(Error::UnsupportedOperation(_))
  ));
  assert!(matches!(stream.position(), Err(Error::UnsupportedOperation(_))));

  // Read-ahead cannot be given back, so flush leaves it alone.
  stream.flush().unwrap();
  assert_eq!(stream.unconsumed(), 3);
}

#[test]
fn length_includes_pending_bytes() {
  let (mut stream, calls) = buffered(b"abc", 16);
  stream.seek(0, SeekOrigin::End).unwrap();
  stream.write(b"de").unwrap();

  assert_eq!(stream.length().unwrap(), 5);
  assert_eq!(calls.writes(), vec![2]);
}

#[test]
fn empty_write_past_end_matches_unbuffered() {
  let mut plain = MemoryStream::from(b"abcd".to_vec());
  let mut stream = BufferedStream::new(MemoryStream::from(b"abcd".to_vec()));

  let both: [&mut dyn Stream; 2] = [&mut plain, &mut stream];
  for s in both {
    s.seek(2, SeekOrigin::End).unwrap();
    s.write(b"").unwrap();
  }
  assert_eq!(stream.length().unwrap(), plain.length().unwrap());
  assert_eq!(stream.position().unwrap(), 6);
  assert_eq!(stream.into_inner().unwrap().into_vec(), b"abcd");
}

#[test]
fn set_length_flushes_first() {
  let (mut stream, _) = buffered(b"", 16);
  stream.write(b"0123456789").unwrap();
  stream.set_length(4).unwrap();

  assert_eq!(stream.length().unwrap(), 4);
  assert_eq!(stream.position().unwrap(), 4);
  assert_eq!(stream.get_ref().data(), b"0123");
}

#[test]
fn negative_seek_is_rejected() {
  let (mut stream, _) = buffered(b"abc", 4);
  assert!(matches!(
    stream.seek(-1, SeekOrigin::Begin),
    Err(Error::ArgumentInvalid { .. })
  ));
  assert_eq!(stream.position().unwrap(), 0);
}

#[test]
fn read_only_inner_rejects_writes() {
  let mut stream = BufferedStream::new(MemoryStream::read_only(b"ro".to_vec()));
  assert!(!stream.can_write());
  assert!(matches!(stream.write(b"x"), Err(Error::UnsupportedOperation(_))));
  assert!(matches!(stream.set_length(0), Err(Error::UnsupportedOperation(_))));
  assert_eq!(stream.read_byte().unwrap(), Some(b'r'));
}

#[test]
fn closed_inner_is_rejected() {
  let mut inner = MemoryStream::new();
  inner.close().unwrap();
  assert!(matches!(
    BufferedStreamBuilder::new().build(inner),
    Err(Error::StreamClosed)
  ));
}

#[test]
fn drop_flushes_pending_bytes() {
  let mut target = MemoryStream::new();
  {
    let mut stream = BufferedStream::new(&mut target);
    stream.write(b"written on drop").unwrap();
  }
  assert_eq!(target.as_slice(), b"written on drop");
  assert!(target.is_closed());
}

#[test]
fn copy_to_moves_everything() {
  let source: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
  let mut from = BufferedStream::new(MemoryStream::from(source.clone()));
  let mut to = BufferedStreamBuilder::new()
    .buffer_size(100)
    .build(MemoryStream::new())
    .unwrap();

  assert_eq!(from.copy_to(&mut to, 333).unwrap(), 10_000);
  assert_eq!(to.into_inner().unwrap().into_vec(), source);
}

#[test]
fn null_stream_swallows_writes() {
  let mut stream = BufferedStream::new(NullStream::new());
  stream.write(&[1u8; 10_000]).unwrap();
  assert_eq!(stream.read(&mut [0u8; 8]).unwrap(), 0);
  assert_eq!(stream.length().unwrap(), 0);
}
