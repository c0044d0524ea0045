//! Shared bookkeeping utilities for the load-balancer control plane.
//!
//! - [`IdAllocator`]: bounded, lowest-first allocator for service and
//!   backend IDs
//! - [`SyncMap`]: registry map with explicit reference counting that never
//!   creates entries implicitly

mod id_alloc;
mod sync_map;

pub use id_alloc::{IdAllocError, IdAllocator};
pub use sync_map::{HasRefCount, SyncMap, SyncMapError};
