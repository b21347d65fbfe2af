//! Self-observation tests.

use std::cell::Cell;
use std::ptr::NonNull;
use std::rc::Rc;

use rudo_rc::{CountingAllocator, Global, Shared, SharedFromThis, Weak, WeakSelf};

#[derive(SharedFromThis)]
struct Widget {
    id: u32,
    this: WeakSelf<Widget>,
}

impl Widget {
    fn new(id: u32) -> Self {
        Self {
            id,
            this: WeakSelf::new(),
        }
    }

    /// Hands out a handle to itself, as a callback registration would.
    fn register(&self, registry: &mut Vec<Shared<Self>>) {
        registry.push(self.shared_from_this());
    }
}

#[test]
fn test_shared_from_this_after_adoption() {
    let handle = Shared::from_box_observed(Box::new(Widget::new(1)));
    assert_eq!(handle.use_count(), 1);

    let mut registry = Vec::new();
    handle.register(&mut registry);

    assert_eq!(handle.use_count(), 2);
    assert!(Shared::ptr_eq(&handle, &registry[0]));
    assert_eq!(registry[0].id, 1);
}

#[test]
fn test_shared_from_this_after_combined_construction() {
    let handle = Shared::new_observed(Widget::new(2));
    let again = handle.shared_from_this();
    assert!(Shared::ptr_eq(&handle, &again));
    assert_eq!(handle.use_count(), 2);
    assert_eq!(handle.weak_count(), 1);
}

#[test]
fn test_shared_from_this_before_adoption_is_empty() {
    let widget = Widget::new(3);
    assert!(widget.shared_from_this().is_empty());
    assert!(widget.weak_from_this().is_empty());
    assert!(!widget.weak_self().is_linked());
}

#[test]
fn test_plain_constructor_leaves_slot_empty() {
    let handle = Shared::new(Widget::new(4));
    assert!(handle.shared_from_this().is_empty());
    assert_eq!(handle.weak_count(), 0);
}

#[test]
fn test_weak_from_this() {
    let handle = Shared::new_observed(Widget::new(5));
    let weak: Weak<Widget> = handle.weak_from_this();
    assert_eq!(weak.use_count(), 1);
    assert_eq!(handle.weak_count(), 2);

    drop(handle);
    assert!(weak.expired());
}

#[test]
fn test_slot_not_relinked() {
    let handle = Shared::new_observed(Widget::new(6));
    let raw = Shared::as_ptr(&handle).cast_mut();

    // A second, non-owning block for the same object cannot take over the slot.
    let second = unsafe { Shared::try_adopt_observed_in(raw, |_: NonNull<Widget>| {}, Global) }
        .unwrap();
    assert!(!Shared::ptr_eq(&second, &handle));
    assert!(Shared::ptr_eq(&second.shared_from_this(), &handle));
    drop(second);
    assert_eq!(handle.id, 6);
}

#[test]
fn test_shared_from_this_during_destruction_is_empty() {
    struct Probe {
        this: WeakSelf<Probe>,
        saw_empty: Rc<Cell<bool>>,
    }

    impl SharedFromThis for Probe {
        fn weak_self(&self) -> &WeakSelf<Self> {
            &self.this
        }
    }

    impl Drop for Probe {
        fn drop(&mut self) {
            self.saw_empty.set(self.shared_from_this().is_empty());
        }
    }

    let saw_empty = Rc::new(Cell::new(false));
    let alloc = CountingAllocator::new();
    let handle = Shared::new_observed_in(
        Probe {
            this: WeakSelf::new(),
            saw_empty: Rc::clone(&saw_empty),
        },
        alloc.clone(),
    );
    drop(handle);

    assert!(saw_empty.get());
    assert_eq!(alloc.deallocations(), 1);
    assert_eq!(alloc.live_bytes(), 0);
}

#[test]
fn test_try_observed_constructors() {
    let handle = Shared::try_new_observed_in(Widget::new(7), Global).unwrap();
    assert!(Shared::ptr_eq(&handle.shared_from_this(), &handle));

    let failing = CountingAllocator::with_budget(0);
    assert!(Shared::try_new_observed_in(Widget::new(8), failing).is_err());

    let raw = Box::into_raw(Box::new(Widget::new(9)));
    let adopted = unsafe {
        Shared::try_adopt_observed_in(
            raw,
            |ptr: NonNull<Widget>| drop(Box::from_raw(ptr.as_ptr())),
            Global,
        )
    }
    .unwrap();
    assert_eq!(adopted.shared_from_this().id, 9);
}

#[test]
fn test_cloned_object_has_fresh_slot() {
    #[derive(Clone, SharedFromThis)]
    struct Doc {
        this: WeakSelf<Doc>,
    }

    let handle = Shared::new_observed(Doc {
        this: WeakSelf::new(),
    });
    let copy = (*handle).clone();
    assert!(handle.weak_self().is_linked());
    assert!(!copy.weak_self().is_linked());
}
