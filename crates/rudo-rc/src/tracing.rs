//! Control block tracing support.
//!
//! When the `tracing` feature is enabled, this module emits structured
//! TRACE-level events for the lifecycle of every control block. Without the
//! feature the hooks compile to nothing.

use crate::block::BlockKind;

#[cfg(feature = "tracing")]
pub mod internal {
    use std::alloc::Layout;

    use super::BlockKind;

    /// A block was allocated and initialised.
    pub fn log_block_allocated(kind: BlockKind, block: *const u8, layout: Layout) {
        tracing::trace!(kind = ?kind, block = ?block, size = layout.size(), "block_allocated");
    }

    /// The last strong reference went away and the deleter ran.
    pub fn log_deleter_run(block: *const u8) {
        tracing::trace!(block = ?block, "deleter_run");
    }

    /// The block's storage went back to its allocator.
    pub fn log_block_released(block: *const u8) {
        tracing::trace!(block = ?block, "block_released");
    }

    /// `lock` was called on an expired weak handle.
    pub fn log_upgrade_failed(block: *const u8) {
        tracing::trace!(block = ?block, "upgrade_failed");
    }

    /// An allocator refused a block.
    pub fn log_allocation_failed(kind: BlockKind, layout: Layout) {
        tracing::debug!(kind = ?kind, size = layout.size(), align = layout.align(), "allocation_failed");
    }
}

#[cfg(not(feature = "tracing"))]
#[allow(clippy::missing_const_for_fn)]
pub mod internal {
    use std::alloc::Layout;

    use super::BlockKind;

    /// Stub function when tracing is disabled.
    #[inline]
    pub fn log_block_allocated(_kind: BlockKind, _block: *const u8, _layout: Layout) {}

    /// Stub function when tracing is disabled.
    #[inline]
    pub fn log_deleter_run(_block: *const u8) {}

    /// Stub function when tracing is disabled.
    #[inline]
    pub fn log_block_released(_block: *const u8) {}

    /// Stub function when tracing is disabled.
    #[inline]
    pub fn log_upgrade_failed(_block: *const u8) {}

    /// Stub function when tracing is disabled.
    #[inline]
    pub fn log_allocation_failed(_kind: BlockKind, _layout: Layout) {}
}
