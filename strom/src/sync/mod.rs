//! Synchronization primitives used to serialize asynchronous stream
//! operations and to hand results between threads.

mod cancel;
mod mutex;
pub mod oneshot;
mod semaphore;

pub use cancel::*;
pub use mutex::*;
pub use semaphore::*;
