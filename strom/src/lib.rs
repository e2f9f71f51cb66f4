#![cfg_attr(docsrs, feature(doc_cfg))]
//! Buffered byte streams that work the same whether they are driven with
//! blocking calls or asynchronously.
//!
//! - [`io::Stream`]: the capability-typed stream contract.
//! - [`io::BufferedStream`]: read-ahead and write-coalescing buffering over
//!   any stream.
//! - [`io::AsyncStream`]: cancellable async operations (and a begin/end
//!   calling pattern) over any stream, at most one in flight at a time.
//! - `fs::FileStream`: a stream over an OS file handle that uses io_uring for
//!   its async path when the kernel supports it.
//!
//! ```rust
//! use strom::io::{BufferedStream, MemoryStream, SeekOrigin, Stream};
//!
//! let mut stream = BufferedStream::new(MemoryStream::new());
//! stream.write(b"hello").unwrap();
//! stream.seek(0, SeekOrigin::Begin).unwrap();
//!
//! let mut out = [0u8; 5];
//! assert_eq!(stream.read(&mut out).unwrap(), 5);
//! assert_eq!(&out, b"hello");
//! ```

#[macro_use]
mod macros;
mod loom;

pub mod blocking;
pub mod error;
pub mod future;
pub mod io;
pub mod sync;

cfg_fs! {
  pub mod fs;
}

pub use error::{BufResult, Error, Result};
pub use strom_macros::test;

#[doc(hidden)]
pub use strom_macros::internal_test;
