//! Control blocks: the shared ledger behind every handle.
//!
//! A control block owns the strong and weak counters for one managed object
//! and knows how to reach, destroy and free it. Two layouts exist:
//!
//! - [`RegularBlock`]: the object was allocated by the caller and is reached
//!   through a stored pointer; a deleter destroys it and the allocator only
//!   ever frees the block itself.
//! - [`EmbeddedBlock`]: the object lives inline in the block, so one
//!   allocation serves both; the allocator destroys the value in place and
//!   then frees the block.
//!
//! Handles only ever hold a `NonNull<BlockHeader>`. The header stores
//! type-erased function pointers for the concrete block's operations, so
//! every handle works the same regardless of object, deleter or allocator
//! type.

use std::alloc::Layout;
use std::cell::Cell;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};

use crate::allocator::{Allocator, TypedAllocator};
use crate::error::AllocError;
use crate::metrics;
use crate::tracing::internal as trace;

/// Which control block layout backs a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Separately allocated object adopted from a pointer.
    Regular,
    /// Object stored inline with its counters.
    Embedded,
}

// ============================================================================
// Deleters
// ============================================================================

/// Destroys an adopted object once its last strong reference is gone.
///
/// Any `FnOnce(NonNull<T>)` closure is a deleter.
pub trait Deleter<T: ?Sized> {
    /// Destroy the object at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be the pointer this deleter was adopted with, and the
    /// object must not be used afterwards. Implementations must not panic.
    unsafe fn delete(self, ptr: NonNull<T>);
}

/// The default deleter: reclaims a pointer produced by `Box::into_raw`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultDelete;

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    unsafe fn delete(self, ptr: NonNull<T>) {
        // SAFETY: adoption with `DefaultDelete` requires a boxed pointer.
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

impl<T: ?Sized, F: FnOnce(NonNull<T>)> Deleter<T> for F {
    unsafe fn delete(self, ptr: NonNull<T>) {
        self(ptr);
    }
}

// ============================================================================
// BlockHeader - counters and erased operations
// ============================================================================

/// The counters and type-erased operations shared by every block layout.
///
/// Obtainable through `Shared::into_raw_parts`; the only public surface is
/// the pair of counters.
#[repr(C)]
pub struct BlockHeader {
    strong: Cell<usize>,
    weak: Cell<usize>,
    get_fn: unsafe fn(NonNull<Self>) -> NonNull<()>,
    drop_fn: unsafe fn(NonNull<Self>),
    release_fn: unsafe fn(NonNull<Self>),
}

impl BlockHeader {
    /// A header for block type `B`, owning one strong reference.
    fn new<B: ControlBlock>() -> Self {
        Self {
            strong: Cell::new(1),
            weak: Cell::new(0),
            get_fn: get_shim::<B>,
            drop_fn: drop_shim::<B>,
            release_fn: release_shim::<B>,
        }
    }

    /// Number of strong references.
    #[must_use]
    pub fn strong_count(&self) -> usize {
        self.strong.get()
    }

    /// Number of weak references.
    #[must_use]
    pub fn weak_count(&self) -> usize {
        self.weak.get()
    }

    /// Type-erased pointer to the managed object.
    ///
    /// # Safety
    ///
    /// `block` must be live. The result dangles once the deleter has run.
    pub(crate) unsafe fn get(block: NonNull<Self>) -> NonNull<()> {
        // SAFETY: guaranteed by the caller.
        unsafe { (block.as_ref().get_fn)(block) }
    }

    pub(crate) fn inc_strong(&self) {
        self.strong.set(checked_inc(self.strong.get()));
    }

    /// Take a strong reference only if the object is still alive.
    pub(crate) fn try_inc_strong(&self) -> bool {
        let strong = self.strong.get();
        if strong == 0 {
            return false;
        }
        self.strong.set(checked_inc(strong));
        true
    }

    fn dec_strong(&self) -> usize {
        let strong = self.strong.get();
        debug_assert!(strong > 0, "strong count underflow");
        self.strong.set(strong - 1);
        strong - 1
    }

    pub(crate) fn inc_weak(&self) {
        self.weak.set(checked_inc(self.weak.get()));
    }

    fn dec_weak(&self) -> usize {
        let weak = self.weak.get();
        debug_assert!(weak > 0, "weak count underflow");
        self.weak.set(weak - 1);
        weak - 1
    }
}

impl fmt::Debug for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockHeader")
            .field("strong", &self.strong.get())
            .field("weak", &self.weak.get())
            .finish_non_exhaustive()
    }
}

/// Counts only overflow when handles are leaked with `mem::forget`.
fn checked_inc(count: usize) -> usize {
    count
        .checked_add(1)
        .unwrap_or_else(|| std::process::abort())
}

// ============================================================================
// ControlBlock - the capability implemented by each layout
// ============================================================================

/// Operations every block layout provides.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` with a [`BlockHeader`] as their first
/// field, created through [`BlockHeader::new::<Self>`].
pub(crate) unsafe trait ControlBlock: Sized {
    const KIND: BlockKind;

    /// Pointer to the managed object.
    unsafe fn get(this: NonNull<Self>) -> NonNull<()>;

    /// Destroy the managed object. Called exactly once.
    unsafe fn run_deleter(this: NonNull<Self>);

    /// Free the block's own storage. Called exactly once, after
    /// `run_deleter`, when both counts are zero.
    unsafe fn release(this: NonNull<Self>);
}

unsafe fn get_shim<B: ControlBlock>(block: NonNull<BlockHeader>) -> NonNull<()> {
    // SAFETY: the header is the first field of `B`.
    unsafe { B::get(block.cast()) }
}

unsafe fn drop_shim<B: ControlBlock>(block: NonNull<BlockHeader>) {
    // SAFETY: the header is the first field of `B`.
    unsafe { B::run_deleter(block.cast()) }
}

unsafe fn release_shim<B: ControlBlock>(block: NonNull<BlockHeader>) {
    // SAFETY: the header is the first field of `B`.
    unsafe { B::release(block.cast()) }
}

fn note_allocated<B: ControlBlock>(block: NonNull<B>) {
    metrics::record(|m| match B::KIND {
        BlockKind::Regular => m.regular_blocks += 1,
        BlockKind::Embedded => m.embedded_blocks += 1,
    });
    trace::log_block_allocated(B::KIND, block.as_ptr().cast(), Layout::new::<B>());
}

fn note_failure<B: ControlBlock>(err: &AllocError) {
    metrics::record(|m| m.allocation_failures += 1);
    trace::log_allocation_failed(B::KIND, err.layout);
}

// ============================================================================
// Reference release
// ============================================================================

/// Drop one strong reference to `block`.
///
/// The last strong reference runs the deleter; the block is then released
/// unless weak references remain.
///
/// # Safety
///
/// The caller must own a strong reference to the live `block`.
pub(crate) unsafe fn release_strong(block: NonNull<BlockHeader>) {
    // SAFETY: the caller's strong reference keeps the block alive.
    let header = unsafe { block.as_ref() };
    if header.dec_strong() > 0 {
        return;
    }

    // The deleter holds a weak reference of its own so that weak handles
    // dropped by the object's destructor cannot release the block early.
    header.inc_weak();
    // SAFETY: the strong count just reached zero, so the deleter runs once.
    unsafe { (header.drop_fn)(block) };
    metrics::record(|m| m.objects_destroyed += 1);
    trace::log_deleter_run(block.as_ptr().cast());

    // SAFETY: releases the deleter's weak reference.
    unsafe { release_weak(block) };
}

/// Drop one weak reference to `block`, releasing it when nothing is left.
///
/// # Safety
///
/// The caller must own a weak reference to the live `block`.
pub(crate) unsafe fn release_weak(block: NonNull<BlockHeader>) {
    // SAFETY: the caller's weak reference keeps the block alive.
    let header = unsafe { block.as_ref() };
    if header.dec_weak() > 0 || header.strong_count() > 0 {
        return;
    }

    let release = header.release_fn;
    // SAFETY: both counts are zero and the deleter has already run.
    unsafe { release(block) };
    metrics::record(|m| m.blocks_released += 1);
    trace::log_block_released(block.as_ptr().cast());
}

// ============================================================================
// RegularBlock - caller-allocated object
// ============================================================================

/// A block for an object allocated by the caller.
#[repr(C)]
pub(crate) struct RegularBlock<T: ?Sized, D, A> {
    header: BlockHeader,
    ptr: NonNull<T>,
    deleter: ManuallyDrop<D>,
    alloc: ManuallyDrop<A>,
}

impl<T, D, A> RegularBlock<T, D, A>
where
    T: ?Sized,
    D: Deleter<T> + 'static,
    A: Allocator + 'static,
{
    /// Allocate a block adopting `ptr`.
    ///
    /// On failure nothing is adopted: `ptr` is untouched and the deleter is
    /// dropped without being called.
    pub(crate) fn allocate(
        ptr: NonNull<T>,
        deleter: D,
        alloc: A,
    ) -> Result<NonNull<BlockHeader>, AllocError> {
        let blocks = TypedAllocator::<Self, A>::new(alloc);
        let block = blocks.allocate(1).inspect_err(note_failure::<Self>)?;

        let value = Self {
            header: BlockHeader::new::<Self>(),
            ptr,
            deleter: ManuallyDrop::new(deleter),
            alloc: ManuallyDrop::new(blocks.inner().clone()),
        };
        // SAFETY: freshly allocated storage for one `Self`.
        unsafe { blocks.construct(block, value) };

        note_allocated(block);
        Ok(block.cast())
    }
}

unsafe impl<T, D, A> ControlBlock for RegularBlock<T, D, A>
where
    T: ?Sized,
    D: Deleter<T> + 'static,
    A: Allocator + 'static,
{
    const KIND: BlockKind = BlockKind::Regular;

    unsafe fn get(this: NonNull<Self>) -> NonNull<()> {
        // SAFETY: `this` is a live block.
        unsafe { (*this.as_ptr()).ptr.cast() }
    }

    unsafe fn run_deleter(this: NonNull<Self>) {
        let this = this.as_ptr();
        // SAFETY: called once, so the deleter has not been taken yet.
        unsafe {
            let deleter = ManuallyDrop::take(&mut (*this).deleter);
            deleter.delete((*this).ptr);
        }
    }

    unsafe fn release(this: NonNull<Self>) {
        // SAFETY: called once; nothing reads the allocator afterwards.
        let alloc = unsafe { ManuallyDrop::take(&mut (*this.as_ptr()).alloc) };
        let blocks = TypedAllocator::<Self, A>::new(alloc);
        // SAFETY: the block was allocated as one `Self` by this allocator.
        unsafe { blocks.deallocate(this, 1) };
    }
}

// ============================================================================
// EmbeddedBlock - object stored inline
// ============================================================================

/// A block storing its object inline, created by combined construction.
#[repr(C)]
pub(crate) struct EmbeddedBlock<T, A> {
    header: BlockHeader,
    alloc: ManuallyDrop<A>,
    value: T,
}

impl<T, A: Allocator + 'static> EmbeddedBlock<T, A> {
    /// Allocate a block and construct the value returned by `init` inside it.
    ///
    /// Exactly one allocation is made. If `init` panics the storage is
    /// returned to the allocator.
    pub(crate) fn allocate_with<F>(alloc: A, init: F) -> Result<NonNull<BlockHeader>, AllocError>
    where
        F: FnOnce() -> T,
    {
        struct DropGuard<'a, B, A: Allocator> {
            blocks: &'a TypedAllocator<B, A>,
            block: NonNull<B>,
            completed: bool,
        }

        impl<B, A: Allocator> Drop for DropGuard<'_, B, A> {
            fn drop(&mut self) {
                if !self.completed {
                    // SAFETY: nothing was constructed in the block yet.
                    unsafe { self.blocks.deallocate(self.block, 1) };
                }
            }
        }

        let blocks = TypedAllocator::<Self, A>::new(alloc);
        let block = blocks.allocate(1).inspect_err(note_failure::<Self>)?;
        let raw = block.as_ptr();

        let mut guard = DropGuard {
            blocks: &blocks,
            block,
            completed: false,
        };

        // SAFETY: `raw` points to uninitialised storage for one `Self`; each
        // field is written exactly once.
        unsafe {
            let value = NonNull::new_unchecked(ptr::addr_of_mut!((*raw).value));
            blocks.inner().construct(value, init());
            ptr::addr_of_mut!((*raw).header).write(BlockHeader::new::<Self>());
        }

        guard.completed = true;
        std::mem::forget(guard);

        // SAFETY: as above.
        unsafe {
            ptr::addr_of_mut!((*raw).alloc).write(ManuallyDrop::new(blocks.into_inner()));
        }

        note_allocated(block);
        Ok(block.cast())
    }
}

unsafe impl<T, A: Allocator + 'static> ControlBlock for EmbeddedBlock<T, A> {
    const KIND: BlockKind = BlockKind::Embedded;

    unsafe fn get(this: NonNull<Self>) -> NonNull<()> {
        // SAFETY: `this` is a live block.
        unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*this.as_ptr()).value)).cast() }
    }

    unsafe fn run_deleter(this: NonNull<Self>) {
        let this = this.as_ptr();
        // SAFETY: called once; the value is initialised until now.
        unsafe {
            let value = NonNull::new_unchecked(ptr::addr_of_mut!((*this).value));
            (*this).alloc.destroy(value);
        }
    }

    unsafe fn release(this: NonNull<Self>) {
        // SAFETY: called once; the value was already destroyed.
        let alloc = unsafe { ManuallyDrop::take(&mut (*this.as_ptr()).alloc) };
        let blocks = TypedAllocator::<Self, A>::new(alloc);
        // SAFETY: the block was allocated as one `Self` by this allocator.
        unsafe { blocks.deallocate(this, 1) };
    }
}
