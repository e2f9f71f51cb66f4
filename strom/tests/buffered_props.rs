//! Randomized operation sequences run against a buffered stream and a plain
//! memory stream side by side. Buffering must never be observable.

use rand::{rngs::StdRng, Rng, SeedableRng};
use strom::io::{BufferedStreamBuilder, MemoryStream, SeekOrigin, Stream};

const STEPS: usize = 400;

fn random_bytes(rng: &mut StdRng, len: usize) -> Vec<u8> {
  (0..len).map(|_| rng.gen()).collect()
}

fn run(seed: u64, buffer_size: usize, shadow_limit: usize) {
  let mut rng = StdRng::seed_from_u64(seed);
  let len = rng.gen_range(0..64);
  let initial = random_bytes(&mut rng, len);

  let mut reference = MemoryStream::from(initial.clone());
  let mut stream = BufferedStreamBuilder::new()
    .buffer_size(buffer_size)
    .shadow_limit(shadow_limit)
    .build(MemoryStream::from(initial))
    .unwrap();

  for step in 0..STEPS {
    let context = format!("seed {seed} size {buffer_size} step {step}");

    match rng.gen_range(0..10) {
      0..=2 => {
        let len = rng.gen_range(0..3 * buffer_size + 2);
        let data = random_bytes(&mut rng, len);
        reference.write(&data).unwrap();
        stream.write(&data).unwrap();
      }
      3..=5 => {
        let len = rng.gen_range(0..3 * buffer_size + 2);
        let mut expected = vec![0u8; len];
        let mut actual = vec![0u8; len];
        // Short reads are allowed; drain until both agree on the byte count.
        let want = reference.read(&mut expected).unwrap();
        let mut got = 0;
        while got < want {
          let n = stream.read(&mut actual[got..want]).unwrap();
          assert_ne!(n, 0, "{context}: premature end of stream");
          got += n;
        }
        assert_eq!(&expected[..want], &actual[..want], "{context}");
      }
      6 | 7 => {
        let length = reference.length().unwrap() as i64;
        let position = reference.position().unwrap() as i64;
        let target = rng.gen_range(0..=length + 4);
        let (offset, origin) = match rng.gen_range(0..3) {
          0 => (target, SeekOrigin::Begin),
          1 => (target - position, SeekOrigin::Current),
          _ => (target - length, SeekOrigin::End),
        };
        let expected = reference.seek(offset, origin).unwrap();
        assert_eq!(stream.seek(offset, origin).unwrap(), expected, "{context}");
      }
      8 => {
        stream.flush().unwrap();
        assert_eq!(stream.pending(), 0, "{context}");
      }
      _ => {
        assert_eq!(
          stream.length().unwrap(),
          reference.length().unwrap(),
          "{context}"
        );
      }
    }

    assert!(
      stream.unconsumed() == 0 || stream.pending() == 0,
      "{context}: read-ahead and pending writes coexist"
    );
    assert_eq!(
      stream.position().unwrap(),
      reference.position().unwrap(),
      "{context}"
    );
  }

  let expected = reference.into_vec();
  let actual = stream.into_inner().unwrap().into_vec();
  assert_eq!(actual, expected, "seed {seed} size {buffer_size}");
}

#[test]
fn matches_unbuffered_stream() {
  for seed in 0..16 {
    for buffer_size in [1, 2, 3, 4, 7, 16, 64] {
      run(seed, buffer_size, 81920);
    }
  }
}

#[test]
fn matches_unbuffered_stream_without_coalescing() {
  for seed in 100..108 {
    for buffer_size in [2, 5, 16] {
      run(seed, buffer_size, 0);
    }
  }
}

#[test]
fn bytes_survive_random_chunking() {
  let mut rng = StdRng::seed_from_u64(0x5157);

  for _ in 0..24 {
    let buffer_size = rng.gen_range(1..=8192);
    let len = rng.gen_range(0..=100_000);
    let payload = random_bytes(&mut rng, len);

    let mut stream = BufferedStreamBuilder::new()
      .buffer_size(buffer_size)
      .build(MemoryStream::new())
      .unwrap();

    let mut written = 0;
    while written < payload.len() {
      let n = rng.gen_range(1..=2 * buffer_size + 1).min(payload.len() - written);
      stream.write(&payload[written..written + n]).unwrap();
      written += n;
    }
    assert_eq!(stream.position().unwrap(), payload.len() as u64);

    stream.seek(0, SeekOrigin::Begin).unwrap();
    let mut actual = vec![0u8; payload.len()];
    let mut got = 0;
    while got < actual.len() {
      let want = rng.gen_range(1..=2 * buffer_size + 1).min(actual.len() - got);
      let n = stream.read(&mut actual[got..got + want]).unwrap();
      assert_ne!(n, 0, "size {buffer_size}: premature end of stream");
      got += n;
    }
    assert_eq!(stream.read(&mut [0u8; 1]).unwrap(), 0);
    assert_eq!(actual, payload, "size {buffer_size}");
  }
}
