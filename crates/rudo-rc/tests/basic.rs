//! Basic ownership tests for rudo-rc.

use std::cell::Cell;
use std::collections::HashSet;
use std::ptr::NonNull;
use std::rc::Rc;

use rudo_rc::Shared;

/// Increments a shared counter when dropped.
struct DropCounter(Rc<Cell<usize>>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

#[test]
fn test_adopt_copy_and_drop() {
    let drops = Rc::new(Cell::new(0));
    let raw = Box::into_raw(Box::new(DropCounter(Rc::clone(&drops))));

    let first = unsafe { Shared::adopt(raw) };
    assert_eq!(first.use_count(), 1);

    let copy = first.clone();
    assert_eq!(first.use_count(), 2);
    assert_eq!(copy.use_count(), 2);

    drop(copy);
    assert_eq!(first.use_count(), 1);
    assert_eq!(drops.get(), 0);

    drop(first);
    assert_eq!(drops.get(), 1);
}

#[test]
fn test_destroyed_once_in_any_order() {
    for order in [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1]] {
        let drops = Rc::new(Cell::new(0));
        let first = Shared::new(DropCounter(Rc::clone(&drops)));
        let weak = Shared::downgrade(&first);
        let mut handles: Vec<Option<Shared<DropCounter>>> =
            vec![Some(first.clone()), Some(first.clone()), Some(first.clone()), Some(first)];

        for (i, &slot) in order.iter().enumerate() {
            assert_eq!(drops.get(), 0);
            handles[slot] = None;
            assert_eq!(weak.use_count(), 3 - i);
        }
        assert_eq!(drops.get(), 1);
        assert!(weak.expired());
    }
}

#[test]
fn test_deref_and_get() {
    let x = Shared::new(String::from("hello"));
    assert_eq!(&*x, "hello");
    assert_eq!(x.len(), 5);
    assert_eq!(x.get().map(String::as_str), Some("hello"));
    assert_eq!(Shared::as_ptr(&x), x.get().unwrap() as *const String);
}

#[test]
fn test_empty_handle() {
    let empty: Shared<i32> = Shared::default();
    assert!(empty.is_empty());
    assert_eq!(empty.use_count(), 0);
    assert_eq!(empty.weak_count(), 0);
    assert!(empty.get().is_none());
    assert!(Shared::as_ptr(&empty).is_null());
    assert!(Shared::ptr_eq(&empty, &Shared::empty()));
    assert_eq!(format!("{empty:?}"), "Shared(<empty>)");
}

#[test]
#[should_panic(expected = "dereferenced an empty Shared handle")]
fn test_deref_empty_panics() {
    let empty: Shared<i32> = Shared::empty();
    let value: i32 = *empty;
    assert_eq!(value, 0);
}

#[test]
fn test_adopt_null_is_empty() {
    let handle = unsafe { Shared::<u64>::adopt(std::ptr::null_mut()) };
    assert!(handle.is_empty());
    assert_eq!(handle.use_count(), 0);
}

#[test]
fn test_take_moves_without_touching_counts() {
    let mut source = Shared::new(7);
    let witness = source.clone();
    assert_eq!(witness.use_count(), 2);

    let dest = source.take();
    assert_eq!(source.use_count(), 0);
    assert!(source.get().is_none());
    assert_eq!(dest.use_count(), 2);
    assert!(Shared::ptr_eq(&dest, &witness));
}

#[test]
fn test_move_keeps_count() {
    let source = Shared::new([1_u8; 16]);
    let weak = Shared::downgrade(&source);
    let moved = source;
    assert_eq!(moved.use_count(), 1);
    assert_eq!(weak.use_count(), 1);
}

#[test]
fn test_reset() {
    let drops = Rc::new(Cell::new(0));
    let mut handle = Shared::new(DropCounter(Rc::clone(&drops)));
    handle.reset();
    assert!(handle.is_empty());
    assert_eq!(drops.get(), 1);

    // Resetting an empty handle is a no-op.
    handle.reset();
    assert_eq!(drops.get(), 1);
}

#[test]
fn test_reset_to_replaces_before_releasing() {
    let drops = Rc::new(Cell::new(0));
    let mut handle = Shared::new(DropCounter(Rc::clone(&drops)));
    let old = Shared::downgrade(&handle);

    handle.reset_to(Box::new(DropCounter(Rc::clone(&drops))));
    assert_eq!(drops.get(), 1);
    assert!(old.expired());
    assert_eq!(handle.use_count(), 1);
    assert!(!Shared::ptr_eq(&handle, &old.lock()));
}

#[test]
fn test_reset_in_with_custom_deleter() {
    let deleted = Rc::new(Cell::new(0));
    let counter = Rc::clone(&deleted);
    let mut handle = Shared::new(1_u32);

    let raw = Box::into_raw(Box::new(2_u32));
    unsafe {
        handle.reset_in(
            raw,
            move |ptr: NonNull<u32>| {
                counter.set(counter.get() + 1);
                drop(Box::from_raw(ptr.as_ptr()));
            },
            rudo_rc::Global,
        );
    }
    assert_eq!(*handle, 2);
    drop(handle);
    assert_eq!(deleted.get(), 1);
}

#[test]
fn test_from_box_unsized() {
    let boxed: Box<[u32]> = vec![1, 2, 3].into_boxed_slice();
    let slice: Shared<[u32]> = Shared::from(boxed);
    assert_eq!(&*slice, &[1, 2, 3]);
    assert_eq!(slice.use_count(), 1);
}

#[test]
fn test_from_value() {
    let handle: Shared<&str> = "value".into();
    assert_eq!(*handle, "value");
}

#[test]
fn test_ptr_eq() {
    let x = Shared::new(42);
    let y = Shared::clone(&x);
    let z = Shared::new(42);

    assert!(Shared::ptr_eq(&x, &y));
    assert!(!Shared::ptr_eq(&x, &z));
    assert_eq!(x, z);
}

#[test]
fn test_hash_and_display() {
    let mut set = HashSet::new();
    set.insert(Shared::new(1));
    set.insert(Shared::new(1));
    set.insert(Shared::new(2));
    assert_eq!(set.len(), 2);

    assert_eq!(Shared::new(3.5).to_string(), "3.5");
    assert_eq!(Shared::<i32>::empty().to_string(), "<empty>");
}

#[test]
fn test_many_allocations() {
    let values: Vec<Shared<usize>> = (0..100).map(Shared::new).collect();
    for (i, handle) in values.iter().enumerate() {
        assert_eq!(**handle, i);
        assert_eq!(handle.use_count(), 1);
    }
}
