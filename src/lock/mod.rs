//! Distributed Lock
//!
//! A named, leased, ownership-checked mutual-exclusion primitive shared by
//! every process that talks to the same cache.
//!
//! ```text
//!   try_acquire(resource, ttl)          release(lease)
//!            │                                │
//!            ▼                                ▼
//!   SET lock:{resource} {token} NX PX   compare-and-delete(lock:{resource}, token)
//! ```
//!
//! The lease TTL only protects against crashed or hung holders. Callers must
//! keep their critical section well inside it.

mod lease;
mod retry;

pub use lease::{DistributedLock, LockLease, LOCK_KEY_PREFIX};
pub use retry::RetryPolicy;
