//! Loom tests for the weak upgrade protocol.
//!
//! Handles are single-threaded, but the upgrade rule is stated for any
//! port with atomic counters: an upgrade increments the strong count only
//! while it is nonzero. These models check that rule against a concurrent
//! release of the last strong reference.

use loom::sync::atomic::{AtomicUsize, Ordering};
use loom::sync::Arc;

/// Check-then-increment, as `Weak::lock` does it.
fn try_upgrade(strong: &AtomicUsize) -> bool {
    let mut current = strong.load(Ordering::Relaxed);
    loop {
        if current == 0 {
            return false;
        }
        match strong.compare_exchange_weak(
            current,
            current + 1,
            Ordering::Acquire,
            Ordering::Relaxed,
        ) {
            Ok(_) => return true,
            Err(actual) => current = actual,
        }
    }
}

/// Returns `true` if this call released the last reference.
fn release(strong: &AtomicUsize) -> bool {
    strong.fetch_sub(1, Ordering::AcqRel) == 1
}

/// An upgrade racing the final release never observes a destroyed object.
#[test]
#[ignore = "loom test - run with cargo test loom_upgrade_race --release"]
fn test_upgrade_races_release() {
    loom::model(|| {
        let strong = Arc::new(AtomicUsize::new(1));
        let destroyed = Arc::new(AtomicUsize::new(0));

        let release_thread = loom::thread::spawn({
            let strong = Arc::clone(&strong);
            let destroyed = Arc::clone(&destroyed);
            move || {
                if release(&strong) {
                    destroyed.fetch_add(1, Ordering::Release);
                }
            }
        });

        let upgraded = try_upgrade(&strong);
        if upgraded {
            // The upgraded reference must be released too.
            if release(&strong) {
                destroyed.fetch_add(1, Ordering::Release);
            }
        }

        release_thread.join().unwrap();

        assert_eq!(strong.load(Ordering::Acquire), 0);
        assert_eq!(destroyed.load(Ordering::Acquire), 1);
    });
}

/// Once the count reaches zero, no upgrade succeeds.
#[test]
#[ignore = "loom test - run with cargo test loom_upgrade_expired --release"]
fn test_upgrade_after_expiry_fails() {
    loom::model(|| {
        let strong = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..2)
            .map(|_| {
                let strong = Arc::clone(&strong);
                loom::thread::spawn(move || try_upgrade(&strong))
            })
            .collect();

        for thread in threads {
            assert!(!thread.join().unwrap());
        }
        assert_eq!(strong.load(Ordering::Acquire), 0);
    });
}
