//! Pluggable allocation strategy for control blocks and embedded values.
//!
//! [`Allocator`] is the byte-level capability a handle is parameterised
//! over. [`TypedAllocator`] layers the element-typed view on top of it
//! (`allocate(n)`, `deallocate(ptr, n)`, `construct`, `destroy`) together
//! with [`TypedAllocator::rebind`], which produces an equivalent allocator
//! for another element type. The same allocator value is rebound to the
//! concrete control block type when a block is created and again when it is
//! released.

use std::alloc::Layout;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::error::AllocError;

/// A source of raw memory.
///
/// # Safety
///
/// `allocate` must return memory that is valid for reads and writes of
/// `layout.size()` bytes and aligned to `layout.align()`, and that stays
/// valid until it is passed to `deallocate` of this allocator or any clone
/// of it. Clones must be interchangeable: memory allocated through one clone
/// may be deallocated through another.
pub unsafe trait Allocator: Clone {
    /// Allocate a block of memory fitting `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the memory could not be provided.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Return memory obtained from [`Allocator::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must have been allocated by this allocator (or a clone) with
    /// exactly `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Move `value` into the uninitialised slot at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes and properly aligned for `T`.
    unsafe fn construct<T>(&self, ptr: NonNull<T>, value: T) {
        // SAFETY: guaranteed by the caller.
        unsafe { ptr.as_ptr().write(value) };
    }

    /// Run the destructor of the value at `ptr` without freeing its memory.
    ///
    /// # Safety
    ///
    /// `ptr` must point to an initialised `T` that is not used afterwards.
    unsafe fn destroy<T: ?Sized>(&self, ptr: NonNull<T>) {
        // SAFETY: guaranteed by the caller.
        unsafe { std::ptr::drop_in_place(ptr.as_ptr()) };
    }
}

/// The process-wide allocator (`std::alloc`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Global;

unsafe impl Allocator for Global {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.size() == 0 {
            return Ok(dangling(layout));
        }
        // SAFETY: the layout has a non-zero size.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(AllocError::new(layout))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            // SAFETY: the caller guarantees `ptr` came from `allocate(layout)`.
            unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}

/// A well-aligned, non-null address for zero-sized requests.
const fn dangling(layout: Layout) -> NonNull<u8> {
    // SAFETY: alignments are never zero.
    unsafe { NonNull::new_unchecked(std::ptr::without_provenance_mut(layout.align())) }
}

// ============================================================================
// TypedAllocator - element-typed view of an allocator
// ============================================================================

/// An [`Allocator`] bound to the element type `T`.
///
/// # Examples
///
/// ```
/// use rudo_rc::{Global, TypedAllocator};
///
/// let ints = TypedAllocator::<u32, _>::new(Global);
/// let slot = ints.allocate(4).unwrap();
/// unsafe {
///     ints.construct(slot, 7);
///     assert_eq!(*slot.as_ptr(), 7);
///     ints.destroy(slot);
///     ints.deallocate(slot, 4);
/// }
///
/// // The same underlying allocator, now handing out `u64` slots.
/// let longs = ints.rebind::<u64>();
/// let slot = longs.allocate(1).unwrap();
/// unsafe { longs.deallocate(slot, 1) };
/// ```
pub struct TypedAllocator<T, A: Allocator = Global> {
    alloc: A,
    _marker: PhantomData<fn() -> T>,
}

impl<T, A: Allocator> TypedAllocator<T, A> {
    /// Bind `alloc` to the element type `T`.
    pub const fn new(alloc: A) -> Self {
        Self {
            alloc,
            _marker: PhantomData,
        }
    }

    /// Produce an equivalent allocator for the element type `U`.
    #[must_use]
    pub fn rebind<U>(&self) -> TypedAllocator<U, A> {
        TypedAllocator::new(self.alloc.clone())
    }

    /// The underlying byte-level allocator.
    pub const fn inner(&self) -> &A {
        &self.alloc
    }

    /// Unbind, returning the underlying allocator.
    pub fn into_inner(self) -> A {
        self.alloc
    }

    /// Allocate uninitialised storage for `n` values of `T`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the allocator refuses the request or the
    /// total size overflows `isize::MAX`.
    pub fn allocate(&self, n: usize) -> Result<NonNull<T>, AllocError> {
        let layout = Self::array_layout(n)?;
        self.alloc.allocate(layout).map(NonNull::cast)
    }

    /// Free storage for `n` values previously obtained from
    /// [`TypedAllocator::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate(n)` on this allocator or a rebind of
    /// the same underlying allocator, with the same `n`.
    pub unsafe fn deallocate(&self, ptr: NonNull<T>, n: usize) {
        // The layout was valid when the storage was allocated.
        if let Ok(layout) = Self::array_layout(n) {
            // SAFETY: guaranteed by the caller.
            unsafe { self.alloc.deallocate(ptr.cast(), layout) };
        }
    }

    /// Construct `value` in place at `ptr`.
    ///
    /// # Safety
    ///
    /// See [`Allocator::construct`].
    pub unsafe fn construct(&self, ptr: NonNull<T>, value: T) {
        // SAFETY: guaranteed by the caller.
        unsafe { self.alloc.construct(ptr, value) };
    }

    /// Destroy the value at `ptr` in place.
    ///
    /// # Safety
    ///
    /// See [`Allocator::destroy`].
    pub unsafe fn destroy(&self, ptr: NonNull<T>) {
        // SAFETY: guaranteed by the caller.
        unsafe { self.alloc.destroy(ptr) };
    }

    fn array_layout(n: usize) -> Result<Layout, AllocError> {
        Layout::array::<T>(n).map_err(|_| AllocError::new(Layout::new::<T>()))
    }
}

impl<T, A: Allocator> Clone for TypedAllocator<T, A> {
    fn clone(&self) -> Self {
        Self::new(self.alloc.clone())
    }
}

impl<T, A: Allocator + fmt::Debug> fmt::Debug for TypedAllocator<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedAllocator")
            .field("element", &std::any::type_name::<T>())
            .field("alloc", &self.alloc)
            .finish()
    }
}

// ============================================================================
// CountingAllocator - instrumented adaptor
// ============================================================================

#[derive(Debug, Default)]
struct AllocStats {
    allocations: Cell<usize>,
    deallocations: Cell<usize>,
    live_bytes: Cell<usize>,
    failures: Cell<usize>,
    budget: Cell<Option<usize>>,
}

/// An allocator adaptor that records every allocation event.
///
/// Clones and rebinds share the same statistics, so the counts observed
/// through the original value include every block allocated on its behalf.
/// An optional budget caps the number of successful allocations; requests
/// beyond it fail with [`AllocError`].
///
/// # Examples
///
/// ```
/// use rudo_rc::{CountingAllocator, Shared};
///
/// let alloc = CountingAllocator::new();
/// let shared = Shared::new_in((42, "a"), alloc.clone());
/// assert_eq!(alloc.allocations(), 1);
/// assert_eq!(shared.0, 42);
///
/// drop(shared);
/// assert_eq!(alloc.deallocations(), 1);
/// assert_eq!(alloc.live_bytes(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct CountingAllocator<A: Allocator = Global> {
    inner: A,
    stats: Rc<AllocStats>,
}

impl CountingAllocator<Global> {
    /// Count allocations served by [`Global`].
    #[must_use]
    pub fn new() -> Self {
        Self::wrap(Global)
    }

    /// Count allocations served by [`Global`], allowing at most `budget`
    /// successful allocations.
    #[must_use]
    pub fn with_budget(budget: usize) -> Self {
        let alloc = Self::new();
        alloc.set_budget(Some(budget));
        alloc
    }
}

impl Default for CountingAllocator<Global> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Allocator> CountingAllocator<A> {
    /// Count allocations served by `inner`.
    pub fn wrap(inner: A) -> Self {
        Self {
            inner,
            stats: Rc::new(AllocStats::default()),
        }
    }

    /// Number of successful allocations so far.
    #[must_use]
    pub fn allocations(&self) -> usize {
        self.stats.allocations.get()
    }

    /// Number of deallocations so far.
    #[must_use]
    pub fn deallocations(&self) -> usize {
        self.stats.deallocations.get()
    }

    /// Bytes currently allocated and not yet returned.
    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.stats.live_bytes.get()
    }

    /// Number of refused requests.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.stats.failures.get()
    }

    /// Limit the remaining number of successful allocations. `None` removes
    /// the limit.
    pub fn set_budget(&self, budget: Option<usize>) {
        self.stats.budget.set(budget);
    }
}

unsafe impl<A: Allocator> Allocator for CountingAllocator<A> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let stats = &self.stats;
        if let Some(remaining) = stats.budget.get() {
            if remaining == 0 {
                stats.failures.set(stats.failures.get() + 1);
                return Err(AllocError::new(layout));
            }
            stats.budget.set(Some(remaining - 1));
        }

        match self.inner.allocate(layout) {
            Ok(ptr) => {
                stats.allocations.set(stats.allocations.get() + 1);
                stats.live_bytes.set(stats.live_bytes.get() + layout.size());
                Ok(ptr)
            }
            Err(err) => {
                stats.failures.set(stats.failures.get() + 1);
                Err(err)
            }
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        let stats = &self.stats;
        stats.deallocations.set(stats.deallocations.get() + 1);
        stats
            .live_bytes
            .set(stats.live_bytes.get().saturating_sub(layout.size()));
        // SAFETY: forwarded from the caller.
        unsafe { self.inner.deallocate(ptr, layout) };
    }
}
