//! Streams over OS file handles.
//!
//! [`FileStream`] buffers like [`BufferedStream`](crate::io::BufferedStream)
//! and does all of its I/O at explicit offsets, so it never depends on the
//! descriptor's own cursor. On Linux with the `uring` feature, streams opened
//! with [`FileOptions::overlapped`] submit their asynchronous reads and
//! writes to io_uring instead of the blocking pool.

mod file;
mod handle;
mod options;

cfg_uring! {
  mod driver;
  mod overlapped;
}

pub use file::FileStream;
pub use options::{FileAccess, FileMode, FileOptions, FileShare};
