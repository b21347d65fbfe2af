//! Error types reported by fallible handle construction.

use std::alloc::Layout;

/// The allocator could not provide memory for the requested layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("memory allocation of {} bytes (align {}) failed", .layout.size(), .layout.align())]
pub struct AllocError {
    /// The layout that was requested.
    pub layout: Layout,
}

impl AllocError {
    /// Create an error for a failed request of `layout`.
    #[must_use]
    pub const fn new(layout: Layout) -> Self {
        Self { layout }
    }
}

/// Errors surfaced by `Shared` construction paths.
///
/// Incompatible element types are rejected at compile time and have no
/// runtime variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RcError {
    /// A handle was rebuilt from a null control block, or from a block that
    /// no longer has strong references.
    #[error("invalid control block")]
    InvalidControlBlock,
    /// The allocator failed while creating a control block. Nothing was
    /// adopted.
    #[error(transparent)]
    AllocationFailure(#[from] AllocError),
}

impl RcError {
    /// Returns the failed layout for allocation failures.
    #[must_use]
    pub const fn layout(&self) -> Option<Layout> {
        match self {
            Self::AllocationFailure(err) => Some(err.layout),
            Self::InvalidControlBlock => None,
        }
    }
}
