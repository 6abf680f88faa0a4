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

//! Drives the five-step archival commit protocol: encode a bucket, append
//! it to the data stream, commit a transaction-log action recording that
//! step, mmap the written region back as an archived block, and only then
//! swap the bucket pointer. Ordering the bucket swap last means a crash at
//! any earlier step leaves the bucket untouched in memory; replay picks up
//! from the transaction log, never from partially-swapped state.

use std::path::Path;

use crate::archival::action_log::{ActionLog, ArchivalAction};
use crate::archival::incremental_file::{map_region, IncrementalFileWriter};
use crate::error::Result;
use crate::index::reflog::Reflog;
use crate::monolog::MonoLog;
use crate::storage::codec;
use crate::storage::ptr_metadata::{AuxBlock, PtrMetadata, ALLOC_MMAP};
use crate::storage::{Block, Encoding};

pub struct Archiver {
	writer: IncrementalFileWriter,
	action_log: ActionLog,
	encoding: Encoding,
}

impl Archiver {
	pub fn new<P: AsRef<Path>>(dir: P, prefix: &str, max_file_size: u64, encoding: Encoding) -> Result<Archiver> {
		let dir = dir.as_ref();
		let writer = IncrementalFileWriter::new(dir, prefix, max_file_size)?;
		let action_log = ActionLog::open(dir.join(format!("{}_transaction_log.dat", prefix)))?;
		Ok(Archiver { writer, action_log, encoding })
	}

	/// Archives one in-memory bucket of a monolog-linear structure, whose
	/// element type is read and written as raw bytes. `new_tail` is the
	/// monolog offset the action records as now consistently archived.
	pub fn archive_monolog_bucket<T: Copy>(&mut self, log: &dyn MonoLog<T>, element_idx: usize, bucket_idx: usize, new_tail: u64) -> Result<bool> {
		let ptr = log.bucket_ptr(element_idx)?;
		if !ptr.block().is_in_memory() {
			return Ok(false);
		}
		let slice = ptr.block().as_slice()?;
		let len = slice.len();
		// Safety: reinterpreting a `[T]` as raw bytes to archive it; the
		// bytes are never read back as anything but the same `T` by
		// `Block::as_slice`, which records the matching element count.
		let raw = unsafe { std::slice::from_raw_parts(slice.as_ptr() as *const u8, len * std::mem::size_of::<T>()) };
		let encoded = codec::encode(self.encoding, raw)?;
		let header = PtrMetadata::new(encoded.len() as u32, ALLOC_MMAP, AuxBlock::archived(self.encoding.tag()));
		let (path, offset) = self.writer.append_record(&header, &encoded)?;
		self.action_log.commit(&ArchivalAction::MonologLinear { tail: new_tail })?;
		drop(ptr);
		let mmap = map_region(&path, offset + 8, encoded.len())?;
		log.swap_bucket_ptr(bucket_idx, Box::new(Block::archived(mmap, len, self.encoding)))?;
		log::info!(target: "confluo-storage", "archived monolog bucket {} up to tail {}", bucket_idx, new_tail);
		Ok(true)
	}

	/// Archives one fully-written, in-memory reflog bucket. Returns
	/// whether anything was archived.
	fn archive_reflog_bucket(&mut self, key: &[u8], reflog: &Reflog, element_idx: usize, bucket_idx: usize, max_offset: u64, data_log_offset: u64) -> Result<bool> {
		let ptr = reflog.bucket_ptr(element_idx)?;
		let slice = ptr.block().as_slice()?;
		let raw: Vec<u8> = slice.iter().flat_map(|v| v.to_le_bytes()).collect();
		let encoded = codec::encode(self.encoding, &raw)?;
		let header = PtrMetadata::new(encoded.len() as u32, ALLOC_MMAP, AuxBlock::archived(self.encoding.tag()));
		let (path, offset) = self.writer.append_record(&header, &encoded)?;
		let reflog_index_after = (bucket_idx + 1) * Reflog::bucket_size();
		self.action_log.commit(&ArchivalAction::ReflogBucket {
			key: key.to_vec(),
			reflog_index: reflog_index_after as u64,
			data_log_offset,
		})?;
		let len = slice.len();
		drop(ptr);
		let mmap = map_region(&path, offset + 8, encoded.len())?;
		reflog.swap_bucket_ptr(bucket_idx, Box::new(Block::archived(mmap, len, self.encoding)))?;
		log::info!(
			target: "confluo-storage",
			"archived reflog bucket {} for key {} (max offset {})",
			bucket_idx, crate::display::hex_truncated(key, 16), max_offset,
		);
		Ok(true)
	}

	/// Archives as many of `reflog`'s buckets, starting at `start_index`,
	/// as are both fully written and whose maximum stored offset is below
	/// `data_log_cutoff`. A partially-filled final bucket is never
	/// archived, matching the sentinel scan in `Reflog::max_in_bucket`.
	/// Returns the reflog offset archived up to.
	pub fn archive_reflog(&mut self, key: &[u8], reflog: &Reflog, start_index: usize, data_log_cutoff: u64) -> Result<usize> {
		let bucket_size = Reflog::bucket_size();
		let mut idx = start_index;
		loop {
			let bucket_idx = idx / bucket_size;
			let ptr = match reflog.bucket_ptr(idx) {
				Ok(p) => p,
				Err(_) => break,
			};
			if !ptr.block().is_in_memory() {
				drop(ptr);
				idx = (bucket_idx + 1) * bucket_size;
				continue;
			}
			let slice = ptr.block().as_slice()?;
			let written = slice.iter().take_while(|v| **v != u64::MAX).count();
			if written < bucket_size {
				break;
			}
			let max_offset = match Reflog::max_in_bucket(&slice) {
				Some(m) => m,
				None => break,
			};
			if max_offset >= data_log_cutoff {
				break;
			}
			drop(slice);
			drop(ptr);
			self.archive_reflog_bucket(key, reflog, idx, bucket_idx, max_offset, max_offset)?;
			idx = (bucket_idx + 1) * bucket_size;
		}
		Ok(idx)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::monolog::linear::LinearMonoLog;

	struct TempDir(std::path::PathBuf);

	impl TempDir {
		fn new(name: &str) -> TempDir {
			let mut dir = std::env::temp_dir();
			dir.push(format!("confluo-storage-test-{}-{}", name, std::process::id()));
			std::fs::create_dir_all(&dir).unwrap();
			TempDir(dir)
		}
	}

	impl Drop for TempDir {
		fn drop(&mut self) {
			let _ = std::fs::remove_dir_all(&self.0);
		}
	}

	type SmallLog = LinearMonoLog<u64, 4, 16>;

	#[test]
	fn archive_monolog_bucket_swaps_to_archived_and_preserves_data() {
		let dir = TempDir::new("archiver-monolog");
		let mut archiver = Archiver::new(&dir.0, "data", 1 << 20, Encoding::Identity).unwrap();
		let log = SmallLog::new();
		log.write(0, &[1, 2, 3, 4]);
		let archived = archiver.archive_monolog_bucket(&log, 0, 0, 4).unwrap();
		assert!(archived);
		let mut out = [0u64; 4];
		log.read(0, &mut out).unwrap();
		assert_eq!(out, [1, 2, 3, 4]);
		let ptr = log.bucket_ptr(0).unwrap();
		assert!(!ptr.block().is_in_memory());
	}

	#[test]
	fn archive_reflog_skips_a_partially_filled_final_bucket() {
		let dir = TempDir::new("archiver-reflog");
		let mut archiver = Archiver::new(&dir.0, "reflog", 1 << 20, Encoding::Identity).unwrap();
		let reflog = Reflog::new();
		for off in 0..10u64 {
			reflog.push_back(off);
		}
		let archived_to = archiver.archive_reflog(b"key", &reflog, 0, u64::MAX).unwrap();
		// Fewer than REFLOG_BUCKET_SIZE entries were written, so nothing
		// should have been archived yet.
		assert_eq!(archived_to, 0);
	}

	#[test]
	fn archive_reflog_archives_a_full_bucket_below_the_cutoff() {
		let dir = TempDir::new("archiver-reflog-full");
		let mut archiver = Archiver::new(&dir.0, "reflog", 1 << 20, Encoding::Identity).unwrap();
		let reflog = Reflog::new();
		for off in 0..Reflog::bucket_size() as u64 {
			reflog.push_back(off);
		}
		let archived_to = archiver.archive_reflog(b"key", &reflog, 0, u64::MAX).unwrap();
		assert_eq!(archived_to, Reflog::bucket_size());
		let ptr = reflog.bucket_ptr(0).unwrap();
		assert!(!ptr.block().is_in_memory());
	}
}
