//! Integration tests for the tracing feature.
//!
//! These tests capture the formatted events emitted during block lifecycle
//! operations.

#![cfg(feature = "tracing")]

use std::io;
use std::sync::{Arc, Mutex};

use rudo_rc::{CountingAllocator, Shared};

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Capture {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

fn capture<F: FnOnce()>(f: F) -> String {
    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    capture.text()
}

#[test]
fn test_lifecycle_events() {
    let output = capture(|| {
        let handle = Shared::new(42);
        let weak = Shared::downgrade(&handle);
        drop(handle);
        assert!(weak.lock().is_empty());
    });

    assert!(output.contains("block_allocated"));
    assert!(output.contains("Embedded"));
    assert!(output.contains("deleter_run"));
    assert!(output.contains("upgrade_failed"));
    assert!(output.contains("block_released"));
}

#[test]
fn test_adopted_block_events() {
    let output = capture(|| {
        drop(Shared::from_box(Box::new("boxed")));
    });

    assert!(output.contains("Regular"));
    assert!(output.contains("block_released"));
}

#[test]
fn test_allocation_failure_event() {
    let output = capture(|| {
        let alloc = CountingAllocator::with_budget(0);
        assert!(Shared::try_new_in(1_u8, alloc).is_err());
    });

    assert!(output.contains("allocation_failed"));
    assert!(!output.contains("block_allocated"));
}
