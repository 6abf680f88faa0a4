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

//! Tracks bytes handed out by the engine against a configured ceiling.
//! Actual allocation happens where the data is allocated (`swappable_ptr`,
//! `incremental_file`); this struct is pure bookkeeping plus a last-resort
//! cleanup hook, so it never sits on the hot append path.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

pub struct StorageAllocator {
	mem_bytes: AtomicU64,
	mmap_bytes: AtomicU64,
	max_memory: u64,
	cleanup: Mutex<Option<Box<dyn FnMut() + Send>>>,
}

impl StorageAllocator {
	pub fn new(max_memory: u64) -> StorageAllocator {
		StorageAllocator {
			mem_bytes: AtomicU64::new(0),
			mmap_bytes: AtomicU64::new(0),
			max_memory,
			cleanup: Mutex::new(None),
		}
	}

	/// Registers a callback invoked synchronously, up to `MAX_CLEANUP_ATTEMPTS`
	/// times, when a reservation would exceed `max_memory`. Intended for a
	/// collaborator to evict or trigger archival; it may block briefly, which
	/// is acceptable since this only runs on the out-of-memory path, never on
	/// a normal append.
	pub fn set_cleanup_callback<F: FnMut() + Send + 'static>(&self, cb: F) {
		*self.cleanup.lock() = Some(Box::new(cb));
	}

	/// Reserves `size` bytes against the memory budget, running the
	/// cleanup callback up to `MAX_CLEANUP_ATTEMPTS` times, re-checking the
	/// budget after each attempt, before giving up.
	pub fn try_reserve(&self, size: u64) -> Result<()> {
		const MAX_CLEANUP_ATTEMPTS: usize = 3;
		let mut attempts = 0;
		while self.mem_bytes.load(Ordering::Acquire) + size > self.max_memory && attempts < MAX_CLEANUP_ATTEMPTS {
			match self.cleanup.lock().as_mut() {
				Some(cb) => cb(),
				None => break,
			}
			attempts += 1;
		}
		if self.mem_bytes.load(Ordering::Acquire) + size > self.max_memory {
			log::warn!(target: "confluo-storage", "Max memory reached, refusing {} byte allocation", size);
			return Err(Error::OutOfMemory);
		}
		self.mem_bytes.fetch_add(size, Ordering::AcqRel);
		Ok(())
	}

	pub fn release(&self, size: u64) {
		self.mem_bytes.fetch_sub(size, Ordering::AcqRel);
	}

	pub fn reserve_mmap(&self, size: u64) {
		self.mmap_bytes.fetch_add(size, Ordering::AcqRel);
	}

	pub fn release_mmap(&self, size: u64) {
		self.mmap_bytes.fetch_sub(size, Ordering::AcqRel);
	}

	pub fn memory_utilization(&self) -> u64 {
		self.mem_bytes.load(Ordering::Acquire)
	}

	pub fn mmap_utilization(&self) -> u64 {
		self.mmap_bytes.load(Ordering::Acquire)
	}
}
