//! Control block lifecycle metrics.
//!
//! Handles are single-threaded, so the counters live in a thread-local and
//! describe only the blocks created, destroyed and released on the calling
//! thread.

use std::cell::Cell;

/// Cumulative lifecycle statistics for the current thread.
///
/// # Example
///
/// ```
/// use rudo_rc::{local_metrics, Shared};
///
/// let before = local_metrics();
/// drop(Shared::new(7));
/// let after = local_metrics();
///
/// assert_eq!(after.embedded_blocks - before.embedded_blocks, 1);
/// assert_eq!(after.blocks_released - before.blocks_released, 1);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RcMetrics {
    /// Blocks created by adopting a caller-supplied pointer.
    pub regular_blocks: usize,
    /// Blocks created by combined construction.
    pub embedded_blocks: usize,
    /// Managed objects whose deleter has run.
    pub objects_destroyed: usize,
    /// Blocks whose storage has been returned to their allocator.
    pub blocks_released: usize,
    /// `Weak::lock` calls that found the object already destroyed.
    pub failed_upgrades: usize,
    /// Block allocations refused by an allocator.
    pub allocation_failures: usize,
}

impl RcMetrics {
    /// Create a new `RcMetrics` with all counters set to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            regular_blocks: 0,
            embedded_blocks: 0,
            objects_destroyed: 0,
            blocks_released: 0,
            failed_upgrades: 0,
            allocation_failures: 0,
        }
    }

    /// Total blocks created.
    #[must_use]
    pub const fn blocks_allocated(&self) -> usize {
        self.regular_blocks + self.embedded_blocks
    }

    /// Blocks created but not yet released.
    #[must_use]
    pub const fn live_blocks(&self) -> usize {
        self.blocks_allocated().saturating_sub(self.blocks_released)
    }
}

thread_local! {
    static METRICS: Cell<RcMetrics> = const { Cell::new(RcMetrics::new()) };
}

/// Snapshot of the current thread's metrics.
///
/// Returns zeroed metrics while the thread-local is being torn down.
#[must_use]
pub fn local_metrics() -> RcMetrics {
    METRICS.try_with(Cell::get).unwrap_or_default()
}

/// Reset the current thread's metrics to zero.
pub fn reset_local_metrics() {
    let _ = METRICS.try_with(|m| m.set(RcMetrics::new()));
}

/// Apply `update` to the current thread's metrics.
pub(crate) fn record(update: impl FnOnce(&mut RcMetrics)) {
    let _ = METRICS.try_with(|m| {
        let mut metrics = m.get();
        update(&mut metrics);
        m.set(metrics);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_reset() {
        reset_local_metrics();
        record(|m| m.regular_blocks += 2);
        record(|m| m.blocks_released += 1);

        let metrics = local_metrics();
        assert_eq!(metrics.blocks_allocated(), 2);
        assert_eq!(metrics.live_blocks(), 1);

        reset_local_metrics();
        assert_eq!(local_metrics(), RcMetrics::new());
    }

    #[test]
    fn test_metrics_are_thread_local() {
        reset_local_metrics();
        record(|m| m.failed_upgrades += 1);

        let other = std::thread::spawn(local_metrics).join().unwrap();
        assert_eq!(other.failed_upgrades, 0);
        assert_eq!(local_metrics().failed_upgrades, 1);
    }
}
