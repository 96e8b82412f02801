//! Library of various synchronization methods.

mod reentrant;

pub use reentrant::{ReentrantGuard, ReentrantLock, ReentrantLockAcquisitionError};
