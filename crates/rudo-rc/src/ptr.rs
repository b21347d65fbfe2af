//! The `Shared<T>` and `Weak<T>` handles.
//!
//! This module provides the user-facing ownership types. Both are nullable:
//! an empty handle owns nothing and reports a count of zero.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::allocator::{Allocator, Global};
use crate::block::{self, BlockHeader, DefaultDelete, Deleter, EmbeddedBlock, RegularBlock};
use crate::error::RcError;
use crate::metrics;
use crate::tracing::internal as trace;

/// The object and block pointers of a non-empty handle.
struct Raw<T: ?Sized> {
    value: NonNull<T>,
    block: NonNull<BlockHeader>,
}

impl<T: ?Sized> Raw<T> {
    fn header(&self) -> &BlockHeader {
        // SAFETY: a handle holding `Raw` owns a strong or weak reference,
        // which keeps the block allocated.
        unsafe { self.block.as_ref() }
    }
}

impl<T: ?Sized> Clone for Raw<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Raw<T> {}

fn block_addr<T: ?Sized>(raw: Option<Raw<T>>) -> *const BlockHeader {
    raw.map_or(std::ptr::null(), |raw| raw.block.as_ptr().cast_const())
}

#[track_caller]
fn alloc_failed(err: &RcError) -> ! {
    match err.layout() {
        Some(layout) => std::alloc::handle_alloc_error(layout),
        None => panic!("{err}"),
    }
}

// ============================================================================
// Shared<T> - the strong handle
// ============================================================================

/// A strong, single-threaded, reference-counted handle to a value of type
/// `T`.
///
/// Every clone shares one control block. The value is destroyed exactly once,
/// when the last strong handle goes away; the control block itself is freed
/// once no weak handles remain either.
///
/// `Shared<T>` is `!Send` and `!Sync`: the counters are plain cells.
///
/// # Examples
///
/// ```
/// use rudo_rc::Shared;
///
/// let a = Shared::new(42);
/// let b = Shared::clone(&a);
/// assert_eq!(a.use_count(), 2);
/// assert!(Shared::ptr_eq(&a, &b));
///
/// drop(b);
/// assert_eq!(a.use_count(), 1);
/// assert_eq!(*a, 42);
/// ```
pub struct Shared<T: ?Sized> {
    raw: Option<Raw<T>>,
    _marker: PhantomData<T>,
}

impl<T> Shared<T> {
    /// Allocate a control block holding `value` inline.
    ///
    /// Metadata and value share a single allocation.
    pub fn new(value: T) -> Self {
        Self::new_in(value, Global)
    }

    /// Like [`Shared::new`], allocating the block with `alloc`.
    pub fn new_in<A: Allocator + 'static>(value: T, alloc: A) -> Self {
        match Self::try_new_in(value, alloc) {
            Ok(this) => this,
            Err(err) => alloc_failed(&err),
        }
    }

    /// Like [`Shared::new_in`], reporting allocation failure.
    ///
    /// # Errors
    ///
    /// Returns [`RcError::AllocationFailure`] if `alloc` refuses the block.
    /// `value` is dropped in that case.
    pub fn try_new_in<A: Allocator + 'static>(value: T, alloc: A) -> Result<Self, RcError> {
        Self::try_new_with_in(alloc, || value)
    }

    /// Allocate a control block with `alloc` and construct the value
    /// returned by `init` inside it.
    ///
    /// # Errors
    ///
    /// Returns [`RcError::AllocationFailure`] if `alloc` refuses the block.
    /// `init` is not called in that case.
    pub fn try_new_with_in<A, F>(alloc: A, init: F) -> Result<Self, RcError>
    where
        A: Allocator + 'static,
        F: FnOnce() -> T,
    {
        let block = EmbeddedBlock::allocate_with(alloc, init)?;
        // SAFETY: `block` is live and embeds a `T`.
        let value = unsafe { BlockHeader::get(block) }.cast::<T>();
        Ok(Self::from_parts(value, block))
    }

    /// Raw pointer to the value, or null for an empty handle.
    #[must_use]
    pub fn as_ptr(this: &Self) -> *const T {
        this.raw
            .map_or(std::ptr::null(), |raw| raw.value.as_ptr().cast_const())
    }
}

impl<T: ?Sized> Shared<T> {
    /// An empty handle.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            raw: None,
            _marker: PhantomData,
        }
    }

    const fn from_parts(value: NonNull<T>, block: NonNull<BlockHeader>) -> Self {
        Self {
            raw: Some(Raw { value, block }),
            _marker: PhantomData,
        }
    }

    /// Adopt a boxed value.
    pub fn from_box(value: Box<T>) -> Self {
        Self::from_box_in(value, Global)
    }

    /// Adopt a boxed value, allocating the control block with `alloc`.
    pub fn from_box_in<A: Allocator + 'static>(value: Box<T>, alloc: A) -> Self {
        // SAFETY: `Box::into_raw` yields exactly what `DefaultDelete` expects.
        unsafe { Self::adopt_in(Box::into_raw(value), DefaultDelete, alloc) }
    }

    /// Adopt a pointer produced by `Box::into_raw`.
    ///
    /// A null pointer yields an empty handle.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or come from `Box::into_raw`, and must not be
    /// owned by anything else.
    pub unsafe fn adopt(ptr: *mut T) -> Self {
        // SAFETY: forwarded from the caller.
        unsafe { Self::adopt_in(ptr, DefaultDelete, Global) }
    }

    /// Adopt `ptr`, destroying it with `deleter` and allocating the control
    /// block with `alloc`.
    ///
    /// # Safety
    ///
    /// See [`Shared::try_adopt_in`].
    pub unsafe fn adopt_in<D, A>(ptr: *mut T, deleter: D, alloc: A) -> Self
    where
        D: Deleter<T> + 'static,
        A: Allocator + 'static,
    {
        // SAFETY: forwarded from the caller.
        match unsafe { Self::try_adopt_in(ptr, deleter, alloc) } {
            Ok(this) => this,
            Err(err) => alloc_failed(&err),
        }
    }

    /// Adopt `ptr`, reporting allocation failure.
    ///
    /// A null pointer yields an empty handle and allocates nothing. The
    /// allocator only ever frees the control block; the object is released
    /// by `deleter` once the last strong handle is gone.
    ///
    /// # Errors
    ///
    /// Returns [`RcError::AllocationFailure`] if `alloc` refuses the control
    /// block. Nothing is adopted: the caller still owns `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point to a live `T` that stays valid until
    /// `deleter` is called with it, and calling `deleter` with `ptr` must be
    /// sound.
    pub unsafe fn try_adopt_in<D, A>(ptr: *mut T, deleter: D, alloc: A) -> Result<Self, RcError>
    where
        D: Deleter<T> + 'static,
        A: Allocator + 'static,
    {
        let Some(value) = NonNull::new(ptr) else {
            return Ok(Self::empty());
        };
        let block = RegularBlock::allocate(value, deleter, alloc)?;
        Ok(Self::from_parts(value, block))
    }

    /// Give up this handle's strong reference as raw parts.
    ///
    /// Returns `None` for an empty handle. Use [`Shared::from_raw_parts`] to
    /// take the reference back.
    #[must_use]
    pub fn into_raw_parts(this: Self) -> Option<(NonNull<T>, *const BlockHeader)> {
        let this = ManuallyDrop::new(this);
        this.raw
            .map(|raw| (raw.value, raw.block.as_ptr().cast_const()))
    }

    /// Rebuild a handle from parts produced by [`Shared::into_raw_parts`].
    ///
    /// # Errors
    ///
    /// Returns [`RcError::InvalidControlBlock`] if `block` is null or has no
    /// strong references left.
    ///
    /// # Safety
    ///
    /// A non-null `block` must still be allocated, and the caller must own
    /// the strong reference being handed back for `value`.
    pub unsafe fn from_raw_parts(
        value: NonNull<T>,
        block: *const BlockHeader,
    ) -> Result<Self, RcError> {
        let block = NonNull::new(block.cast_mut()).ok_or(RcError::InvalidControlBlock)?;
        // SAFETY: the caller guarantees the block is allocated.
        if unsafe { block.as_ref() }.strong_count() == 0 {
            return Err(RcError::InvalidControlBlock);
        }
        Ok(Self::from_parts(value, block))
    }

    /// The value, or `None` for an empty handle.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: the strong reference keeps the value alive.
        self.raw.as_ref().map(|raw| unsafe { raw.value.as_ref() })
    }

    /// Returns `true` if this handle owns nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.raw.is_none()
    }

    /// Number of strong handles sharing this block, or 0 when empty.
    #[must_use]
    pub fn use_count(&self) -> usize {
        self.raw.map_or(0, |raw| raw.header().strong_count())
    }

    /// Number of weak handles observing this block, or 0 when empty.
    #[must_use]
    pub fn weak_count(&self) -> usize {
        self.raw.map_or(0, |raw| raw.header().weak_count())
    }

    /// Create a weak handle to this block. An empty handle downgrades to an
    /// empty weak handle.
    #[must_use]
    pub fn downgrade(this: &Self) -> Weak<T> {
        let Some(raw) = this.raw else {
            return Weak::new();
        };
        raw.header().inc_weak();
        Weak { raw: Some(raw) }
    }

    /// Returns `true` if both handles share a control block, or both are
    /// empty.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        std::ptr::eq(block_addr(this.raw), block_addr(other.raw))
    }

    /// Move out of this handle, leaving it empty.
    ///
    /// Counts are untouched: the returned handle carries the reference.
    #[must_use]
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Release this handle's reference and leave it empty.
    pub fn reset(&mut self) {
        drop(self.take());
    }

    /// Adopt `value` in place of the current reference.
    ///
    /// The new block is in place before the old reference is released.
    pub fn reset_to(&mut self, value: Box<T>) {
        let old = std::mem::replace(self, Self::from_box(value));
        drop(old);
    }

    /// Adopt `ptr` with `deleter` and `alloc` in place of the current
    /// reference. A null `ptr` behaves like [`Shared::reset`].
    ///
    /// # Safety
    ///
    /// See [`Shared::try_adopt_in`].
    pub unsafe fn reset_in<D, A>(&mut self, ptr: *mut T, deleter: D, alloc: A)
    where
        D: Deleter<T> + 'static,
        A: Allocator + 'static,
    {
        // SAFETY: forwarded from the caller.
        let new = unsafe { Self::adopt_in(ptr, deleter, alloc) };
        drop(std::mem::replace(self, new));
    }

    /// Convert into a handle to a related view of the same object, sharing
    /// this handle's control block.
    ///
    /// `f` can only return data borrowed from the object (or `'static`
    /// data), which is what keeps the new handle sound.
    ///
    /// # Examples
    ///
    /// ```
    /// use rudo_rc::Shared;
    /// use std::fmt::Display;
    ///
    /// let concrete = Shared::new(5_u32);
    /// let view: Shared<dyn Display> = Shared::cast(concrete.clone(), |v| v as &dyn Display);
    /// assert_eq!(view.to_string(), "5");
    /// assert_eq!(concrete.use_count(), 2);
    /// ```
    pub fn cast<U, F>(this: Self, f: F) -> Shared<U>
    where
        U: ?Sized,
        F: for<'a> FnOnce(&'a T) -> &'a U,
    {
        let Some(raw) = this.raw else {
            return Shared::empty();
        };
        // SAFETY: `this` keeps the value alive for the call.
        let value = NonNull::from(f(unsafe { raw.value.as_ref() }));
        std::mem::forget(this);
        Shared::from_parts(value, raw.block)
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        if let Some(raw) = self.raw {
            raw.header().inc_strong();
        }
        Self {
            raw: self.raw,
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> Drop for Shared<T> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            // SAFETY: this handle owned one strong reference.
            unsafe { block::release_strong(raw.block) };
        }
    }
}

impl<T: ?Sized> Default for Shared<T> {
    /// An empty handle.
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the handle is empty. Use [`Shared::get`] for fallible
    /// access.
    #[track_caller]
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty Shared handle"),
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("Shared").field(&value).finish(),
            None => write!(f, "Shared(<empty>)"),
        }
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Display::fmt(value, f),
            None => f.write_str("<empty>"),
        }
    }
}

impl<T: ?Sized> fmt::Pointer for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&block_addr(self.raw), f)
    }
}

impl<T: ?Sized + PartialEq> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

impl<T: ?Sized + Eq> Eq for Shared<T> {}

impl<T: ?Sized + Hash> Hash for Shared<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.get().hash(state);
    }
}

impl<T> From<T> for Shared<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: ?Sized> From<Box<T>> for Shared<T> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

// ============================================================================
// Weak<T> - the observing handle
// ============================================================================

/// A weak handle observing a [`Shared`] value without keeping it alive.
///
/// Upgrade with [`Weak::lock`] or [`Weak::upgrade`]. A weak handle keeps the
/// control block allocated, never the value.
///
/// # Examples
///
/// ```
/// use rudo_rc::Shared;
///
/// let strong = Shared::new(String::from("hi"));
/// let weak = Shared::downgrade(&strong);
/// assert!(!weak.expired());
/// assert_eq!(weak.lock().as_str(), "hi");
///
/// drop(strong);
/// assert!(weak.expired());
/// assert!(weak.lock().is_empty());
/// ```
pub struct Weak<T: ?Sized> {
    raw: Option<Raw<T>>,
}

impl<T: ?Sized> Weak<T> {
    /// An empty weak handle. It is always expired.
    #[must_use]
    pub const fn new() -> Self {
        Self { raw: None }
    }

    /// Returns `true` if this handle observes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.raw.is_none()
    }

    /// Returns `true` if the handle is empty or the value has been
    /// destroyed.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// Number of strong handles to the observed value.
    #[must_use]
    pub fn use_count(&self) -> usize {
        self.raw.map_or(0, |raw| raw.header().strong_count())
    }

    /// Number of weak handles to the observed block, including this one.
    #[must_use]
    pub fn weak_count(&self) -> usize {
        self.raw.map_or(0, |raw| raw.header().weak_count())
    }

    /// Try to obtain a strong handle.
    ///
    /// The strong count is only incremented while it is nonzero, so an
    /// expired handle yields an empty [`Shared`] and leaves the counters
    /// untouched.
    #[must_use]
    pub fn lock(&self) -> Shared<T> {
        let Some(raw) = self.raw else {
            return Shared::empty();
        };
        if !raw.header().try_inc_strong() {
            metrics::record(|m| m.failed_upgrades += 1);
            trace::log_upgrade_failed(raw.block.as_ptr().cast());
            return Shared::empty();
        }
        Shared::from_parts(raw.value, raw.block)
    }

    /// Like [`Weak::lock`], returning `None` when expired.
    #[must_use]
    pub fn upgrade(&self) -> Option<Shared<T>> {
        let strong = self.lock();
        (!strong.is_empty()).then_some(strong)
    }

    /// Move out of this handle, leaving it empty.
    #[must_use]
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Release this handle's reference and leave it empty.
    pub fn reset(&mut self) {
        drop(self.take());
    }

    /// Returns `true` if both handles observe the same control block, or
    /// both are empty.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        std::ptr::eq(block_addr(this.raw), block_addr(other.raw))
    }

    /// Convert into a weak handle to a related view of the same object.
    ///
    /// See [`Shared::cast`]. An expired handle converts to an empty one.
    #[must_use]
    pub fn cast<U, F>(self, f: F) -> Weak<U>
    where
        U: ?Sized,
        F: for<'a> FnOnce(&'a T) -> &'a U,
    {
        self.upgrade().map_or_else(Weak::new, |strong| {
            Shared::downgrade(&Shared::cast(strong, f))
        })
    }
}

impl<T: ?Sized> Clone for Weak<T> {
    fn clone(&self) -> Self {
        if let Some(raw) = self.raw {
            raw.header().inc_weak();
        }
        Self { raw: self.raw }
    }
}

impl<T: ?Sized> Drop for Weak<T> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            // SAFETY: this handle owned one weak reference.
            unsafe { block::release_weak(raw.block) };
        }
    }
}

impl<T: ?Sized> Default for Weak<T> {
    /// An empty weak handle.
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Weak)")
    }
}

impl<T: ?Sized> From<&Shared<T>> for Weak<T> {
    fn from(strong: &Shared<T>) -> Self {
        Shared::downgrade(strong)
    }
}
