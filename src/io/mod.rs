//! Reply buffering and vectored socket writes.

mod output;

pub use output::{OutputBuffer, WriteProgress, LARGE_REPLY, MAX_IOVECS};
