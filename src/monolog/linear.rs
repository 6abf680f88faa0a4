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

//! Fixed-bucket-count log. Grows bucket-by-bucket as space runs out, up to
//! a hard ceiling of `MAX_BUCKETS`, addressed by plain division instead of
//! the exp2-linear scheme's bit tricks. Used where the number of buckets is
//! known ahead of time to be small (reflogs, and replayed archive buckets).

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};
use crate::monolog::{fresh_bucket, MonoLog};
use crate::storage::{Block, ReadOnlyPtr, SwappablePtr};

pub struct LinearMonoLog<T, const BUCKET_SIZE: usize = 1_048_576, const MAX_BUCKETS: usize = 4096> {
	buckets: Vec<SwappablePtr<T>>,
	tail: AtomicUsize,
}

impl<T: Copy, const BUCKET_SIZE: usize, const MAX_BUCKETS: usize> LinearMonoLog<T, BUCKET_SIZE, MAX_BUCKETS> {
	pub fn new() -> Self {
		let buckets = (0..MAX_BUCKETS).map(|_| SwappablePtr::new()).collect();
		LinearMonoLog { buckets, tail: AtomicUsize::new(0) }
	}

	fn ensure_bucket(&self, bucket_idx: usize) -> Result<&SwappablePtr<T>> {
		let bucket = self.buckets.get(bucket_idx).ok_or(Error::OutOfBounds)?;
		if !bucket.is_initialized() {
			bucket.atomic_init(fresh_bucket(BUCKET_SIZE));
		}
		Ok(bucket)
	}

	pub fn ensure_alloc(&self, start_idx: usize, end_idx: usize) -> Result<()> {
		let b1 = start_idx / BUCKET_SIZE;
		let b2 = end_idx / BUCKET_SIZE;
		for bucket_idx in b1..=b2 {
			self.ensure_bucket(bucket_idx)?;
		}
		Ok(())
	}
}

impl<T: Copy, const BUCKET_SIZE: usize, const MAX_BUCKETS: usize> Default for LinearMonoLog<T, BUCKET_SIZE, MAX_BUCKETS> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T: Copy, const BUCKET_SIZE: usize, const MAX_BUCKETS: usize> MonoLog<T> for LinearMonoLog<T, BUCKET_SIZE, MAX_BUCKETS> {
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
		let bucket_idx = idx / BUCKET_SIZE;
		let bucket_off = idx % BUCKET_SIZE;
		let bucket = self.ensure_bucket(bucket_idx).expect("index within MAX_BUCKETS capacity");
		let copy = bucket.atomic_copy().expect("just initialized");
		// Safety: see `Exp2LinearMonoLog::set` -- identity in-memory buckets
		// borrow their backing storage directly, so this writes the real
		// bucket slot rather than a decoded copy.
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
			let bucket_idx = cur / BUCKET_SIZE;
			let bucket_off = cur % BUCKET_SIZE;
			let bucket = self.ensure_bucket(bucket_idx).expect("index within MAX_BUCKETS capacity");
			let to_write = std::cmp::min(BUCKET_SIZE - bucket_off, remaining);
			let copy = bucket.atomic_copy().expect("just initialized");
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
		let bucket_idx = idx / BUCKET_SIZE;
		let bucket_off = idx % BUCKET_SIZE;
		let bucket = self.buckets.get(bucket_idx).ok_or(Error::OutOfBounds)?;
		let copy = bucket.atomic_copy().ok_or(Error::OutOfBounds)?;
		let slice = copy.block().as_slice()?;
		Ok(slice[bucket_off])
	}

	fn read(&self, idx: usize, out: &mut [T]) -> Result<()> {
		let mut remaining = out.len();
		let mut cur = idx;
		let mut out_off = 0;
		while remaining > 0 {
			let bucket_idx = cur / BUCKET_SIZE;
			let bucket_off = cur % BUCKET_SIZE;
			let bucket = self.buckets.get(bucket_idx).ok_or(Error::OutOfBounds)?;
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
		let bucket_idx = idx / BUCKET_SIZE;
		let bucket = self.buckets.get(bucket_idx).ok_or(Error::OutOfBounds)?;
		bucket.atomic_copy().ok_or(Error::OutOfBounds)
	}

	fn swap_bucket_ptr(&self, bucket_idx: usize, block: Box<Block<T>>) -> Result<()> {
		let bucket = self.buckets.get(bucket_idx).ok_or(Error::OutOfBounds)?;
		bucket.swap_ptr(block)
	}

	fn install_bucket_ptr(&self, bucket_idx: usize, block: Box<Block<T>>) -> Result<()> {
		let bucket = self.buckets.get(bucket_idx).ok_or(Error::OutOfBounds)?;
		if bucket.atomic_init(block) {
			Ok(())
		} else {
			Err(Error::InvalidState("bucket already initialized".into()))
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	type SmallLog = LinearMonoLog<u64, 4, 16>;

	#[test]
	fn push_back_fills_sequential_buckets() {
		let log = SmallLog::new();
		for i in 0..20u64 {
			let idx = log.push_back(i * 2);
			assert_eq!(idx as u64, i);
		}
		for i in 0..20u64 {
			assert_eq!(log.get(i as usize).unwrap(), i * 2);
		}
	}

	#[test]
	fn out_of_bounds_index_errors() {
		let log = SmallLog::new();
		// 16 buckets * 4 elements = 64 is the hard ceiling.
		assert!(log.get(64).is_err());
	}

	#[test]
	fn swap_bucket_ptr_replaces_a_bucket_in_place() {
		let log = SmallLog::new();
		log.write(0, &[1, 2, 3, 4]);
		let mut archived = crate::storage::Block::in_memory(vec![10u64, 20, 30, 40].into_boxed_slice());
		archived.aux = crate::storage::AuxBlock::archived(0);
		log.swap_bucket_ptr(0, Box::new(archived)).unwrap();
		let mut out = [0u64; 4];
		log.read(0, &mut out).unwrap();
		assert_eq!(out, [10, 20, 30, 40]);
	}
}
