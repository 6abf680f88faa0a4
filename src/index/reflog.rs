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

//! A reflog is a radix-tree leaf: a `MonoLog` of record offsets. It uses
//! the linear layout (a bounded number of fixed-size buckets) because a
//! radix tree leaf is expected to hold a bounded number of offsets, unlike
//! the unbounded data log.

use crate::error::Result;
use crate::monolog::MonoLog;
use crate::monolog::linear::LinearMonoLog;
use crate::storage::{Block, ReadOnlyPtr};

pub const REFLOG_BUCKET_SIZE: usize = 1024;
pub const REFLOG_MAX_BUCKETS: usize = 1024;

pub struct Reflog(LinearMonoLog<u64, REFLOG_BUCKET_SIZE, REFLOG_MAX_BUCKETS>);

impl Reflog {
	pub fn new() -> Reflog {
		Reflog(LinearMonoLog::new())
	}

	pub const fn bucket_size() -> usize {
		REFLOG_BUCKET_SIZE
	}

	/// Highest offset stored in a bucket before the first unwritten
	/// sentinel slot (a freshly allocated bucket is memset to
	/// `0xFF` bytes, so an unwritten `u64` slot reads back as `u64::MAX`).
	/// A bucket that is entirely sentinel has no archivable maximum.
	pub fn max_in_bucket(data: &[u64]) -> Option<u64> {
		data.iter().take_while(|v| **v != u64::MAX).copied().max()
	}
}

impl Default for Reflog {
	fn default() -> Self {
		Reflog::new()
	}
}

impl MonoLog<u64> for Reflog {
	fn reserve(&self, count: usize) -> usize {
		self.0.reserve(count)
	}

	fn push_back(&self, val: u64) -> usize {
		self.0.push_back(val)
	}

	fn append(&self, data: &[u64]) -> usize {
		self.0.append(data)
	}

	fn set(&self, idx: usize, val: u64) {
		self.0.set(idx, val)
	}

	fn write(&self, idx: usize, data: &[u64]) {
		self.0.write(idx, data)
	}

	fn get(&self, idx: usize) -> Result<u64> {
		self.0.get(idx)
	}

	fn read(&self, idx: usize, out: &mut [u64]) -> Result<()> {
		self.0.read(idx, out)
	}

	fn size(&self) -> usize {
		self.0.size()
	}

	fn bucket_ptr(&self, idx: usize) -> Result<ReadOnlyPtr<'_, u64>> {
		self.0.bucket_ptr(idx)
	}

	fn swap_bucket_ptr(&self, bucket_idx: usize, block: Box<Block<u64>>) -> Result<()> {
		self.0.swap_bucket_ptr(bucket_idx, block)
	}

	fn install_bucket_ptr(&self, bucket_idx: usize, block: Box<Block<u64>>) -> Result<()> {
		self.0.install_bucket_ptr(bucket_idx, block)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn appended_offsets_are_readable_in_order() {
		let reflog = Reflog::new();
		for off in [10u64, 20, 30] {
			reflog.push_back(off);
		}
		assert_eq!(reflog.get(0).unwrap(), 10);
		assert_eq!(reflog.get(1).unwrap(), 20);
		assert_eq!(reflog.get(2).unwrap(), 30);
		assert_eq!(reflog.size(), 3);
	}

	#[test]
	fn max_in_bucket_stops_at_sentinel() {
		// A freshly allocated bucket is memset to `UNWRITTEN_SENTINEL_BYTE`
		// bytes, so an unwritten `u64` slot reads back as `u64::MAX`.
		let mut bucket = vec![u64::MAX; REFLOG_BUCKET_SIZE];
		bucket[0] = 5;
		bucket[1] = 42;
		assert_eq!(Reflog::max_in_bucket(&bucket), Some(42));
		let empty = vec![u64::MAX; REFLOG_BUCKET_SIZE];
		assert_eq!(Reflog::max_in_bucket(&empty), None);
	}
}
