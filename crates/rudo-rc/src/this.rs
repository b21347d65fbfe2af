//! Self-observation: obtaining a handle to an object from inside it.
//!
//! A type opts in by embedding a [`WeakSelf`] slot and implementing
//! [`SharedFromThis`] (usually through `#[derive(SharedFromThis)]`). The
//! `_observed` constructors on [`Shared`] fill the slot when the first
//! strong handle is created; after that the object can hand out strong or
//! weak handles to itself.

use std::cell::RefCell;
use std::fmt;

use crate::allocator::Allocator;
use crate::block::Deleter;
use crate::error::RcError;
use crate::ptr::{Shared, Weak};

/// The self-observer slot embedded in a [`SharedFromThis`] type.
///
/// Holds a weak handle to the object's own control block once the object
/// is owned by a [`Shared`]. Cloning a `WeakSelf` yields an empty slot: a
/// copy of the object is a different object.
pub struct WeakSelf<T: ?Sized> {
    slot: RefCell<Weak<T>>,
}

impl<T: ?Sized> WeakSelf<T> {
    /// An empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: RefCell::new(Weak::new()),
        }
    }

    /// A copy of the stored weak handle.
    #[must_use]
    pub fn get(&self) -> Weak<T> {
        self.slot.borrow().clone()
    }

    /// Upgrade the stored weak handle.
    #[must_use]
    pub fn lock(&self) -> Shared<T> {
        self.slot.borrow().lock()
    }

    /// Returns `true` once the slot has been filled.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        !self.slot.borrow().is_empty()
    }

    /// Fill the slot, unless an earlier owner already did.
    pub(crate) fn link(&self, weak: Weak<T>) {
        let mut slot = self.slot.borrow_mut();
        if slot.is_empty() {
            *slot = weak;
        }
    }
}

impl<T: ?Sized> Default for WeakSelf<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for WeakSelf<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for WeakSelf<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSelf")
            .field("linked", &self.is_linked())
            .finish()
    }
}

/// Types that can produce handles to themselves.
///
/// # Examples
///
/// ```
/// use rudo_rc::{Shared, SharedFromThis, WeakSelf};
///
/// #[derive(SharedFromThis)]
/// struct Node {
///     name: &'static str,
///     this: WeakSelf<Node>,
/// }
///
/// let node = Shared::new_observed(Node { name: "root", this: WeakSelf::new() });
/// let again = node.shared_from_this();
/// assert!(Shared::ptr_eq(&node, &again));
/// assert_eq!(node.use_count(), 2);
/// assert_eq!(again.name, "root");
/// ```
pub trait SharedFromThis {
    /// The embedded self-observer slot.
    fn weak_self(&self) -> &WeakSelf<Self>;

    /// A strong handle sharing ownership with the handle that owns `self`.
    ///
    /// Empty if `self` is not owned by a [`Shared`] created through one of
    /// the `_observed` constructors, or once the object is being destroyed.
    fn shared_from_this(&self) -> Shared<Self> {
        self.weak_self().lock()
    }

    /// A weak handle to `self`'s control block. Empty before ownership
    /// is established.
    fn weak_from_this(&self) -> Weak<Self> {
        self.weak_self().get()
    }
}

impl<T: SharedFromThis> Shared<T> {
    /// Like [`Shared::new`], linking the value's [`WeakSelf`] slot.
    pub fn new_observed(value: T) -> Self {
        Self::new(value).link_self()
    }

    /// Like [`Shared::new_in`], linking the value's [`WeakSelf`] slot.
    pub fn new_observed_in<A: Allocator + 'static>(value: T, alloc: A) -> Self {
        Self::new_in(value, alloc).link_self()
    }

    /// Like [`Shared::try_new_in`], linking the value's [`WeakSelf`] slot.
    ///
    /// # Errors
    ///
    /// Returns [`RcError::AllocationFailure`] if `alloc` refuses the block.
    pub fn try_new_observed_in<A: Allocator + 'static>(
        value: T,
        alloc: A,
    ) -> Result<Self, RcError> {
        Self::try_new_in(value, alloc).map(Self::link_self)
    }

    /// Like [`Shared::from_box`], linking the value's [`WeakSelf`] slot.
    pub fn from_box_observed(value: Box<T>) -> Self {
        Self::from_box(value).link_self()
    }

    /// Like [`Shared::adopt`], linking the value's [`WeakSelf`] slot.
    ///
    /// # Safety
    ///
    /// See [`Shared::adopt`].
    pub unsafe fn adopt_observed(ptr: *mut T) -> Self {
        // SAFETY: forwarded from the caller.
        unsafe { Self::adopt(ptr) }.link_self()
    }

    /// Like [`Shared::try_adopt_in`], linking the value's [`WeakSelf`] slot.
    ///
    /// # Errors
    ///
    /// Returns [`RcError::AllocationFailure`] if `alloc` refuses the control
    /// block; the slot is left untouched.
    ///
    /// # Safety
    ///
    /// See [`Shared::try_adopt_in`].
    pub unsafe fn try_adopt_observed_in<D, A>(
        ptr: *mut T,
        deleter: D,
        alloc: A,
    ) -> Result<Self, RcError>
    where
        D: Deleter<T> + 'static,
        A: Allocator + 'static,
    {
        // SAFETY: forwarded from the caller.
        unsafe { Self::try_adopt_in(ptr, deleter, alloc) }.map(Self::link_self)
    }

    fn link_self(self) -> Self {
        if let Some(value) = self.get() {
            value.weak_self().link(Self::downgrade(&self));
        }
        self
    }
}
