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

//! Two-level, exponentially-growing bucketed log. Container `i` holds
//! `2^(i + FCB_HIBIT)` buckets of `BUCKET_SIZE` elements each; an index is
//! addressed by clearing the highest set bit of `idx + FCS` and using the
//! position of that bit to pick the container, and the remainder to pick
//! the bucket and offset within it. No previously-allocated bucket is ever
//! moved, so readers holding a `ReadOnlyPtr` into one are never invalidated
//! by later growth.

use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::error::{Error, Result};
use crate::monolog::{fresh_bucket, MonoLog};
use crate::storage::{Block, ReadOnlyPtr, SwappablePtr};

pub(crate) const FCB: usize = 16;
pub(crate) const FCB_HIBIT: u32 = 4;

pub(crate) fn highest_bit(x: usize) -> u32 {
	debug_assert!(x > 0);
	usize::BITS - 1 - x.leading_zeros()
}

pub(crate) fn address(idx: usize, bucket_size: usize, fcs: usize, fcs_hibit: u32) -> (usize, usize, usize) {
	let pos = idx + fcs;
	let hibit = highest_bit(pos);
	let highest_cleared = pos ^ (1 << hibit);
	let bucket_idx = highest_cleared / bucket_size;
	let bucket_off = highest_cleared % bucket_size;
	let container_idx = (hibit - fcs_hibit) as usize;
	(container_idx, bucket_idx, bucket_off)
}

type Container<T> = Vec<SwappablePtr<T>>;

pub struct Exp2LinearMonoLog<T, const BUCKET_SIZE: usize = 1024, const NCONTAINERS: usize = 32> {
	containers: Vec<AtomicPtr<Container<T>>>,
	tail: AtomicUsize,
	fcs: usize,
	fcs_hibit: u32,
}

impl<T: Copy, const BUCKET_SIZE: usize, const NCONTAINERS: usize> Exp2LinearMonoLog<T, BUCKET_SIZE, NCONTAINERS> {
	pub fn new() -> Self {
		let fcs = FCB * BUCKET_SIZE;
		let mut containers = Vec::with_capacity(NCONTAINERS);
		for _ in 0..NCONTAINERS {
			containers.push(AtomicPtr::new(std::ptr::null_mut()));
		}
		Exp2LinearMonoLog { containers, tail: AtomicUsize::new(0), fcs, fcs_hibit: highest_bit(fcs) }
	}

	fn container_bucket_count(container_idx: usize) -> usize {
		1usize << (container_idx as u32 + FCB_HIBIT)
	}

	fn ensure_container(&self, container_idx: usize) -> &Container<T> {
		let slot = &self.containers[container_idx];
		let existing = slot.load(Ordering::Acquire);
		if !existing.is_null() {
			// Safety: once installed a container pointer is never replaced
			// or freed until `self` drops, so this borrow is valid for the
			// lifetime of `&self`.
			return unsafe { &*existing };
		}
		let num_buckets = Self::container_bucket_count(container_idx);
		let new_container: Container<T> = (0..num_buckets).map(|_| SwappablePtr::new()).collect();
		let raw = Box::into_raw(Box::new(new_container));
		match slot.compare_exchange(std::ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire) {
			Ok(_) => unsafe { &*raw },
			Err(existing) => {
				// Safety: CAS failed, so `raw` was never published; we still
				// uniquely own it here.
				unsafe { drop(Box::from_raw(raw)) };
				unsafe { &*existing }
			}
		}
	}

	fn ensure_bucket<'a>(&'a self, container: &'a Container<T>, bucket_idx: usize) -> &'a SwappablePtr<T> {
		let bucket = &container[bucket_idx];
		if !bucket.is_initialized() {
			bucket.atomic_init(fresh_bucket(BUCKET_SIZE));
		}
		bucket
	}

	fn bucket_for(&self, idx: usize) -> (&SwappablePtr<T>, usize) {
		let (container_idx, bucket_idx, bucket_off) = address(idx, BUCKET_SIZE, self.fcs, self.fcs_hibit);
		let container = self.ensure_container(container_idx);
		(self.ensure_bucket(container, bucket_idx), bucket_off)
	}

	/// Ensures every bucket covering `[start_idx, end_idx]` is allocated.
	pub fn ensure_alloc(&self, start_idx: usize, end_idx: usize) {
		let (c1, b1, _) = address(start_idx, BUCKET_SIZE, self.fcs, self.fcs_hibit);
		let (c2, b2, _) = address(end_idx, BUCKET_SIZE, self.fcs, self.fcs_hibit);
		for container_idx in c1..=c2 {
			let container = self.ensure_container(container_idx);
			let lo = if container_idx == c1 { b1 } else { 0 };
			let hi = if container_idx == c2 { b2 } else { container.len() - 1 };
			for bucket_idx in lo..=hi {
				self.ensure_bucket(container, bucket_idx);
			}
		}
	}
}

impl<T: Copy, const BUCKET_SIZE: usize, const NCONTAINERS: usize> Default for Exp2LinearMonoLog<T, BUCKET_SIZE, NCONTAINERS> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T, const BUCKET_SIZE: usize, const NCONTAINERS: usize> Drop for Exp2LinearMonoLog<T, BUCKET_SIZE, NCONTAINERS> {
	fn drop(&mut self) {
		for slot in &mut self.containers {
			let raw = *slot.get_mut();
			if !raw.is_null() {
				// Safety: `&mut self` means nobody else can be reading this
				// container concurrently.
				unsafe { drop(Box::from_raw(raw)) };
			}
		}
	}
}

impl<T: Copy, const BUCKET_SIZE: usize, const NCONTAINERS: usize> MonoLog<T> for Exp2LinearMonoLog<T, BUCKET_SIZE, NCONTAINERS> {
	fn reserve(&self, count: usize) -> usize {
		self.tail.fetch_add(count, Ordering::AcqRel)
	}

	fn push_back(&self, val: T) -> usize {
		let idx = self.tail.fetch_add(1, Ordering::AcqRel);
		self.set(idx, val);
		idx
	}

	fn append(&self, data: &[T]) -> usize {
		let start = self.tail.fetch_add(data.len(), Ordering::AcqRel);
		self.write(start, data);
		start
	}

	fn set(&self, idx: usize, val: T) {
		let (container_idx, bucket_idx, bucket_off) = address(idx, BUCKET_SIZE, self.fcs, self.fcs_hibit);
		let container = self.ensure_container(container_idx);
		let bucket = self.ensure_bucket(container, bucket_idx);
		let copy = bucket.atomic_copy().expect("just initialized");
		// Safety: identity-encoded in-memory buckets are always `Payload::Owned`;
		// `as_slice` never allocates for them, so mutating through the
		// borrowed pointer is equivalent to a direct element write.
		unsafe {
			let ptr = copy.block().as_slice().expect("in-memory bucket never fails to decode").as_ptr() as *mut T;
			ptr.add(bucket_off).write(val);
		}
	}

	fn write(&self, idx: usize, data: &[T]) {
		let mut data_off = 0;
		let mut remaining = data.len();
		let mut cur = idx;
		while remaining > 0 {
			let (container_idx, bucket_idx, bucket_off) = address(cur, BUCKET_SIZE, self.fcs, self.fcs_hibit);
			let container = self.ensure_container(container_idx);
			let bucket = self.ensure_bucket(container, bucket_idx);
			let to_write = std::cmp::min(BUCKET_SIZE - bucket_off, remaining);
			let copy = bucket.atomic_copy().expect("just initialized");
			// Safety: see `set`.
			unsafe {
				let ptr = copy.block().as_slice().expect("in-memory bucket never fails to decode").as_ptr() as *mut T;
				std::ptr::copy_nonoverlapping(data[data_off..].as_ptr(), ptr.add(bucket_off), to_write);
			}
			data_off += to_write;
			cur += to_write;
			remaining -= to_write;
		}
	}

	fn get(&self, idx: usize) -> Result<T> {
		let (container_idx, bucket_idx, bucket_off) = address(idx, BUCKET_SIZE, self.fcs, self.fcs_hibit);
		if container_idx >= self.containers.len() {
			return Err(Error::OutOfBounds);
		}
		let container = self.ensure_container(container_idx);
		let bucket = &container[bucket_idx];
		let copy = bucket.atomic_copy().ok_or(Error::OutOfBounds)?;
		let slice = copy.block().as_slice()?;
		Ok(slice[bucket_off])
	}

	fn read(&self, idx: usize, out: &mut [T]) -> Result<()> {
		let mut remaining = out.len();
		let mut cur = idx;
		let mut out_off = 0;
		while remaining > 0 {
			let (container_idx, bucket_idx, bucket_off) = address(cur, BUCKET_SIZE, self.fcs, self.fcs_hibit);
			if container_idx >= self.containers.len() {
				return Err(Error::OutOfBounds);
			}
			let container = self.ensure_container(container_idx);
			let bucket = &container[bucket_idx];
			let copy = bucket.atomic_copy().ok_or(Error::OutOfBounds)?;
			let slice = copy.block().as_slice()?;
			let to_read = std::cmp::min(BUCKET_SIZE - bucket_off, remaining);
			out[out_off..out_off + to_read].copy_from_slice(&slice[bucket_off..bucket_off + to_read]);
			out_off += to_read;
			cur += to_read;
			remaining -= to_read;
		}
		Ok(())
	}

	fn size(&self) -> usize {
		self.tail.load(Ordering::Acquire)
	}

	fn bucket_ptr(&self, idx: usize) -> Result<ReadOnlyPtr<'_, T>> {
		let (container_idx, bucket_idx, _) = address(idx, BUCKET_SIZE, self.fcs, self.fcs_hibit);
		if container_idx >= self.containers.len() {
			return Err(Error::OutOfBounds);
		}
		let container = self.ensure_container(container_idx);
		container[bucket_idx].atomic_copy().ok_or(Error::OutOfBounds)
	}

	fn swap_bucket_ptr(&self, idx: usize, block: Box<Block<T>>) -> Result<()> {
		let (container_idx, bucket_idx, _) = address(idx, BUCKET_SIZE, self.fcs, self.fcs_hibit);
		let container = self.ensure_container(container_idx);
		container[bucket_idx].swap_ptr(block)
	}

	fn install_bucket_ptr(&self, idx: usize, block: Box<Block<T>>) -> Result<()> {
		let (container_idx, bucket_idx, _) = address(idx, BUCKET_SIZE, self.fcs, self.fcs_hibit);
		let container = self.ensure_container(container_idx);
		if container[bucket_idx].atomic_init(block) {
			Ok(())
		} else {
			Err(Error::InvalidState("bucket already initialized".into()))
		}
	}
}

unsafe impl<T: Send, const BUCKET_SIZE: usize, const NCONTAINERS: usize> Send for Exp2LinearMonoLog<T, BUCKET_SIZE, NCONTAINERS> {}
unsafe impl<T: Send, const BUCKET_SIZE: usize, const NCONTAINERS: usize> Sync for Exp2LinearMonoLog<T, BUCKET_SIZE, NCONTAINERS> {}

#[cfg(test)]
mod test {
	use super::*;

	type SmallLog = Exp2LinearMonoLog<u64, 4, 8>;

	#[test]
	fn push_back_is_monotonic_and_readable() {
		let log = SmallLog::new();
		for i in 0..50u64 {
			let idx = log.push_back(i);
			assert_eq!(idx as u64, i);
		}
		assert_eq!(log.size(), 50);
		for i in 0..50u64 {
			assert_eq!(log.get(i as usize).unwrap(), i);
		}
	}

	#[test]
	fn write_crosses_bucket_boundaries() {
		let log = SmallLog::new();
		log.reserve(10);
		let data: Vec<u64> = (100..110).collect();
		log.write(0, &data);
		let mut out = vec![0u64; 10];
		log.read(0, &mut out).unwrap();
		assert_eq!(out, data);
	}

	#[test]
	fn concurrent_appends_from_many_threads_produce_distinct_indices() {
		use std::sync::Arc;
		let log = Arc::new(SmallLog::new());
		let mut handles = Vec::new();
		for t in 0..8u64 {
			let log = log.clone();
			handles.push(std::thread::spawn(move || {
				let mut indices = Vec::new();
				for i in 0..20u64 {
					indices.push(log.push_back(t * 100 + i));
				}
				indices
			}));
		}
		let mut all_indices = Vec::new();
		for h in handles {
			all_indices.extend(h.join().unwrap());
		}
		all_indices.sort_unstable();
		let expected: Vec<usize> = (0..160).collect();
		assert_eq!(all_indices, expected);
	}
}
