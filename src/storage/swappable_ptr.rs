// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of Parity.

// Parity is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Parity is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Parity.  If not, see <http://www.gnu.org/licenses/>.

//! An atomically swappable, ref-counted pointer to a `Block<T>`. It starts
//! null, is CAS-initialized exactly once, may be read and cloned freely by
//! concurrent readers, and may be swapped exactly once from an in-memory
//! block to an archived one while readers hold valid references.
//!
//! The lifetime of a `SwappablePtr` must exceed the lifetime of any
//! `ReadOnlyPtr` it produced, since those copies borrow its reference
//! counts directly rather than owning a clone of them.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crate::error::{Error, Result};
use crate::storage::encoded_ptr::Block;
use crate::storage::ptr_metadata::STATE_IN_MEMORY;
use crate::storage::reference_counts::ReferenceCounts;

pub struct SwappablePtr<T> {
	ref_counts: ReferenceCounts,
	ptr: AtomicPtr<Block<T>>,
	swapped: AtomicBool,
}

unsafe impl<T: Send> Send for SwappablePtr<T> {}
unsafe impl<T: Send> Sync for SwappablePtr<T> {}

impl<T: Copy> SwappablePtr<T> {
	pub fn new() -> SwappablePtr<T> {
		SwappablePtr { ref_counts: ReferenceCounts::new(), ptr: AtomicPtr::new(ptr::null_mut()), swapped: AtomicBool::new(false) }
	}

	/// CAS-initializes the pointer. Returns true if this call won the race;
	/// the losing block is dropped.
	pub fn atomic_init(&self, block: Box<Block<T>>) -> bool {
		let raw = Box::into_raw(block);
		match self.ptr.compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire) {
			Ok(_) => true,
			Err(_) => {
				// Safety: `raw` was just produced by `Box::into_raw` above and
				// the CAS failed, so nothing else observed or took ownership of it.
				unsafe { drop(Box::from_raw(raw)) };
				false
			}
		}
	}

	pub fn is_initialized(&self) -> bool {
		!self.ptr.load(Ordering::Acquire).is_null()
	}

	/// Swaps the current block for `new_block`. Only one swap is supported;
	/// a second call returns `Error::InvalidState`.
	pub fn swap_ptr(&self, new_block: Box<Block<T>>) -> Result<()> {
		if self.swapped.swap(true, Ordering::AcqRel) {
			return Err(Error::InvalidState("swappable pointer already swapped".into()));
		}
		let new_raw = Box::into_raw(new_block);
		let old_raw = self.ptr.swap(new_raw, Ordering::AcqRel);
		debug_assert!(!old_raw.is_null(), "swap_ptr called before atomic_init");
		if self.ref_counts.decrement_first_and_compare() {
			// Safety: the first counter reaching zero means no live
			// `ReadOnlyPtr` still references the in-memory block, and the
			// pointer itself is being replaced here so nothing else can
			// create a new reference to it either.
			unsafe { drop(Box::from_raw(old_raw)) };
		}
		Ok(())
	}

	/// Creates a read-only, ref-counted copy of the current block. Returns
	/// `None` if the pointer has not been initialized yet.
	pub fn atomic_copy(&self) -> Option<ReadOnlyPtr<'_, T>> {
		// Increment both counters first so a concurrent swap can't
		// deallocate the block we're about to read between the load and
		// the corrective decrement below.
		self.ref_counts.increment_both();
		let raw = self.ptr.load(Ordering::Acquire);
		if raw.is_null() {
			self.ref_counts.decrement_both();
			return None;
		}
		// Safety: raw is non-null and was allocated by `atomic_init`/`swap_ptr`;
		// it cannot be freed while either counter this copy bumped is nonzero.
		let state = unsafe { (*raw).aux.state };
		if state == STATE_IN_MEMORY {
			self.ref_counts.decrement_second();
		} else {
			self.ref_counts.decrement_first();
		}
		Some(ReadOnlyPtr { ptr: raw, ref_counts: Some(&self.ref_counts) })
	}
}

impl<T> Drop for SwappablePtr<T> {
	fn drop(&mut self) {
		let raw = *self.ptr.get_mut();
		if raw.is_null() {
			return;
		}
		// Safety: `&mut self` means no concurrent access is possible.
		let state = unsafe { (*raw).aux.state };
		let reaches_zero = if state == STATE_IN_MEMORY {
			self.ref_counts.decrement_first_and_compare()
		} else {
			self.ref_counts.decrement_second_and_compare()
		};
		if reaches_zero {
			unsafe { drop(Box::from_raw(raw)) };
		}
	}
}

impl<T: Copy> Default for SwappablePtr<T> {
	fn default() -> Self {
		SwappablePtr::new()
	}
}

/// A read-only, ref-counted view into a block owned by a `SwappablePtr`.
/// Borrows the parent's reference counts rather than owning a copy of them,
/// so it cannot outlive the `SwappablePtr` that created it.
pub struct ReadOnlyPtr<'a, T> {
	ptr: *mut Block<T>,
	ref_counts: Option<&'a ReferenceCounts>,
}

impl<'a, T: Copy> ReadOnlyPtr<'a, T> {
	pub fn block(&self) -> &Block<T> {
		// Safety: non-null for the lifetime of `self` by construction; see
		// the module doc comment on how the refcount keeps it alive.
		unsafe { &*self.ptr }
	}
}

impl<'a, T> Clone for ReadOnlyPtr<'a, T> {
	fn clone(&self) -> Self {
		if let Some(rc) = self.ref_counts {
			// Safety: see `block()`.
			let state = unsafe { (*self.ptr).aux.state };
			if state == STATE_IN_MEMORY {
				rc.increment_first();
			} else {
				rc.increment_second();
			}
		}
		ReadOnlyPtr { ptr: self.ptr, ref_counts: self.ref_counts }
	}
}

impl<'a, T> Drop for ReadOnlyPtr<'a, T> {
	fn drop(&mut self) {
		if let Some(rc) = self.ref_counts {
			// Safety: see `block()`.
			let state = unsafe { (*self.ptr).aux.state };
			let reaches_zero =
				if state == STATE_IN_MEMORY { rc.decrement_first_and_compare() } else { rc.decrement_second_and_compare() };
			if reaches_zero {
				unsafe { drop(Box::from_raw(self.ptr)) };
			}
		}
	}
}

unsafe impl<'a, T: Send> Send for ReadOnlyPtr<'a, T> {}
unsafe impl<'a, T: Send> Sync for ReadOnlyPtr<'a, T> {}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn atomic_init_wins_exactly_once() {
		let sp: SwappablePtr<u64> = SwappablePtr::new();
		assert!(sp.atomic_init(Box::new(Block::in_memory(vec![1, 2, 3].into_boxed_slice()))));
		assert!(!sp.atomic_init(Box::new(Block::in_memory(vec![9].into_boxed_slice()))));
	}

	#[test]
	fn copies_see_consistent_data_before_and_after_swap() {
		let sp: SwappablePtr<u64> = SwappablePtr::new();
		assert!(sp.atomic_init(Box::new(Block::in_memory(vec![1, 2, 3].into_boxed_slice()))));

		let before = sp.atomic_copy().unwrap();
		assert_eq!(&*before.block().as_slice().unwrap(), &[1, 2, 3]);

		// Build an "archived" block sharing the same data in owned form to
		// avoid needing a real mmap in this unit test; swap semantics don't
		// care how the new block is backed.
		let archived_payload = vec![1u64, 2, 3].into_boxed_slice();
		let mut archived = Block::in_memory(archived_payload);
		archived.aux = crate::storage::ptr_metadata::AuxBlock::archived(0);
		sp.swap_ptr(Box::new(archived)).unwrap();

		// The reader that copied before the swap still sees valid data.
		assert_eq!(&*before.block().as_slice().unwrap(), &[1, 2, 3]);

		let after = sp.atomic_copy().unwrap();
		assert_eq!(&*after.block().as_slice().unwrap(), &[1, 2, 3]);
	}

	#[test]
	fn second_swap_is_rejected() {
		let sp: SwappablePtr<u64> = SwappablePtr::new();
		sp.atomic_init(Box::new(Block::in_memory(vec![1].into_boxed_slice())));
		sp.swap_ptr(Box::new(Block::in_memory(vec![2].into_boxed_slice()))).unwrap();
		let err = sp.swap_ptr(Box::new(Block::in_memory(vec![3].into_boxed_slice()))).unwrap_err();
		assert!(matches!(err, Error::InvalidState(_)));
	}

	#[test]
	fn uninitialized_copy_returns_none() {
		let sp: SwappablePtr<u64> = SwappablePtr::new();
		assert!(sp.atomic_copy().is_none());
	}
}
