//! Device-side helpers
//!
//! - [`device`] wraps the GPU driver: the shared device context and the memory binder.
//! - [`allocator`] holds the back-buffer ring windows render into.
//!
//! With the `test_utils` feature, [`test`] provides recording collaborators for both the driver
//! and the transports.

pub mod allocator;
pub mod device;

#[cfg(any(test, feature = "test_utils"))]
pub mod test;
