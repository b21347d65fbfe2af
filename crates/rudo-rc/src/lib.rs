//! Single-threaded shared ownership for Rust.
//!
//! `rudo-rc` provides a strong handle, [`Shared<T>`], and a weak handle,
//! [`Weak<T>`], that cooperate through a reference-counted control block.
//! Unlike `std::rc::Rc`, the control block is pluggable:
//!
//! - **Adoption**: take ownership of a pointer the caller allocated, with a
//!   custom [`Deleter`] deciding how it is destroyed.
//! - **Combined construction**: allocate the counters and the value in one
//!   block with [`Shared::new`] or [`Shared::new_in`].
//! - **Custom allocators**: every block is allocated through an
//!   [`Allocator`], rebound to the block's concrete type.
//! - **Self-observation**: types implementing [`SharedFromThis`] can hand
//!   out handles to themselves.
//!
//! # Quick Start
//!
//! ```
//! use rudo_rc::{Shared, Weak};
//!
//! let first = Shared::new(vec![1, 2, 3]);
//! let second = first.clone();
//! let observer: Weak<Vec<i32>> = Shared::downgrade(&first);
//!
//! assert_eq!(first.use_count(), 2);
//! assert_eq!(observer.weak_count(), 1);
//!
//! drop(first);
//! drop(second);
//! assert!(observer.expired());
//! assert!(observer.lock().is_empty());
//! ```
//!
//! # Custom deleters and allocators
//!
//! ```
//! use rudo_rc::{CountingAllocator, Shared};
//! use std::ptr::NonNull;
//!
//! let alloc = CountingAllocator::new();
//! let raw = Box::into_raw(Box::new(String::from("adopted")));
//! let handle = unsafe {
//!     Shared::adopt_in(
//!         raw,
//!         |ptr: NonNull<String>| drop(Box::from_raw(ptr.as_ptr())),
//!         alloc.clone(),
//!     )
//! };
//!
//! assert_eq!(handle.as_str(), "adopted");
//! assert_eq!(alloc.allocations(), 1);
//! drop(handle);
//! assert_eq!(alloc.live_bytes(), 0);
//! ```
//!
//! # Thread Safety
//!
//! `Shared<T>` and `Weak<T>` are `!Send` and `!Sync`. The counters are
//! plain cells and must only be touched from one thread.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod allocator;
mod block;
mod error;
mod metrics;
mod ptr;
mod this;
mod tracing;

// Re-export public API
pub use allocator::{Allocator, CountingAllocator, Global, TypedAllocator};
pub use block::{BlockHeader, BlockKind, DefaultDelete, Deleter};
pub use error::{AllocError, RcError};
pub use metrics::{local_metrics, reset_local_metrics, RcMetrics};
pub use ptr::{Shared, Weak};
pub use this::{SharedFromThis, WeakSelf};

// Re-export derive macro when feature is enabled
#[cfg(feature = "derive")]
pub use rudo_rc_derive::SharedFromThis;
