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

//! Lock-free, append-only, indexed logs. Two layouts share the same
//! surface: `exp2_linear` grows its bucket address space geometrically and
//! never reallocates an existing bucket (suited to unbounded logs like the
//! data log), `linear` pre-declares a fixed number of buckets addressed by
//! straight division (suited to logs with a known maximum size, like
//! reflogs and archived buckets read back from disk).

pub mod exp2_linear;
pub mod linear;

use crate::error::Result;
use crate::storage::ReadOnlyPtr;

/// Sentinel byte memset into a freshly allocated, not-yet-written bucket.
/// A freshly-read `u64` slot therefore reads back as `u64::MAX`.
pub const UNWRITTEN_SENTINEL_BYTE: u8 = 0xFF;

pub trait MonoLog<T> {
	/// Reserves `count` contiguous slots, returning the start index.
	fn reserve(&self, count: usize) -> usize;

	/// Appends a single value, returning its index.
	fn push_back(&self, val: T) -> usize;

	/// Appends `data`, returning the start index.
	fn append(&self, data: &[T]) -> usize;

	/// Sets the value at `idx`, allocating buckets as needed.
	fn set(&self, idx: usize, val: T);

	/// Writes `data` starting at `idx`, allocating buckets as needed.
	fn write(&self, idx: usize, data: &[T]);

	/// Reads the value at `idx`.
	fn get(&self, idx: usize) -> Result<T>;

	/// Reads `len` values starting at `idx` into `out`.
	fn read(&self, idx: usize, out: &mut [T]) -> Result<()>;

	/// Number of logical elements appended so far.
	fn size(&self) -> usize;

	/// Borrows a read-only, ref-counted reference to the bucket holding `idx`.
	fn bucket_ptr(&self, idx: usize) -> Result<ReadOnlyPtr<'_, T>>;

	/// Atomically swaps the bucket holding `idx` for an archived block. The
	/// bucket must already be initialized (holding live, in-memory data);
	/// use `install_bucket_ptr` to populate a bucket that has never been
	/// written, as during recovery.
	fn swap_bucket_ptr(&self, bucket_idx: usize, block: Box<crate::storage::Block<T>>) -> Result<()>;

	/// CAS-installs `block` as the bucket at `bucket_idx`, for a bucket that
	/// has never been initialized. Returns `Error::InvalidState` if the
	/// bucket already holds something, since that indicates the caller's
	/// assumption about bucket layout during recovery is wrong.
	fn install_bucket_ptr(&self, bucket_idx: usize, block: Box<crate::storage::Block<T>>) -> Result<()>;
}

pub(crate) fn fresh_bucket<T: Copy>(bucket_size: usize) -> Box<crate::storage::Block<T>> {
	let mut values: Vec<T> = Vec::with_capacity(bucket_size);
	// Safety: `values` has capacity for `bucket_size` elements of `T`; memset
	// the raw backing buffer to the unwritten sentinel, then commit the
	// length. `T: Copy` guarantees there is no drop glue to run over the
	// not-yet-logically-initialized tail we just set the length to cover.
	unsafe {
		std::ptr::write_bytes(values.as_mut_ptr(), UNWRITTEN_SENTINEL_BYTE, bucket_size);
		values.set_len(bucket_size);
	}
	Box::new(crate::storage::Block::in_memory(values.into_boxed_slice()))
}
