//! Shared-memory frame buffer.
//!
//! A segment is a single file (normally under `/dev/shm`) mapped by one producer and
//! one or more consumers. It starts with a fixed header and is followed by the frame
//! data region:
//!
//! ```ignore
//! | Header | padding to 64 bytes | Frame Data |
//! ```
//!
//! The header carries a process-shared pthread mutex and condition variable. The
//! producer writes a frame while holding the mutex, bumps the frame sequence number,
//! and broadcasts the condition. Consumers block in [`ShmBuffer::wait`] until the
//! sequence number moves or the segment is closed, then read the frame while holding
//! the mutex with [`ShmBuffer::lock`] / [`ShmBuffer::unlock`].

mod buffer;
mod error;
mod timestamp;

pub use buffer::*;
pub use error::*;
pub use timestamp::*;
