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

//! Crash recovery: truncate a structure's transaction log to its last
//! committed record, then reattach already-archived buckets by replaying
//! the actions against the structure's data files in the same order the
//! archiver wrote them. Re-applying the unarchived tail of a log against
//! live filters or indexes is a schema-level concern owned by a
//! collaborator; this module only restores the structural, already-mmap'd
//! state it left on disk.

use std::fs::OpenOptions;
use std::path::Path;

use crate::archival::action_log::{ActionLog, ArchivalAction};
use crate::archival::incremental_file::{map_region, IncrementalFileReader};
use crate::error::{Error, Result};
use crate::index::reflog::Reflog;
use crate::monolog::MonoLog;
use crate::storage::{Block, Encoding};

pub struct Loader;

impl Loader {
	/// Replays a transaction log and truncates it to the last validly
	/// committed record, discarding any torn tail a crash mid-append left
	/// behind. Returns the committed actions in commit order.
	pub fn recover_transaction_log<P: AsRef<Path>>(path: P) -> Result<Vec<ArchivalAction>> {
		let path = path.as_ref();
		let (actions, committed_len) = ActionLog::replay(path)?;
		if path.exists() {
			let actual_len = std::fs::metadata(path)?.len();
			if actual_len > committed_len {
				let file = OpenOptions::new().write(true).open(path)?;
				file.set_len(committed_len)?;
				log::warn!(
					target: "confluo-storage",
					"truncated {} from {} to {} bytes recovering a torn commit",
					path.display(), actual_len, committed_len,
				);
			}
		}
		Ok(actions)
	}

	/// Reattaches archived monolog-linear buckets. The Nth `MonologLinear`
	/// action corresponds to the Nth data-file record and the Nth bucket,
	/// since `Archiver::archive_monolog_bucket` only ever archives buckets
	/// in strictly increasing order starting at zero. Returns the number
	/// of buckets reattached.
	pub fn reload_monolog<T: Copy>(
		dir: impl AsRef<Path>,
		prefix: &str,
		actions: &[ArchivalAction],
		log: &dyn MonoLog<T>,
		bucket_len: usize,
	) -> Result<usize> {
		let mut reader = IncrementalFileReader::new(dir, prefix);
		let mut bucket_idx = 0usize;
		for action in actions {
			if !matches!(action, ArchivalAction::MonologLinear { .. }) {
				continue;
			}
			let record = reader
				.next_record()?
				.ok_or_else(|| Error::CorruptArchive("transaction log references a missing data record".into()))?;
			let encoding = Encoding::from_tag(record.header.aux.encoding)
				.ok_or_else(|| Error::CorruptArchive(format!("unknown encoding tag {}", record.header.aux.encoding)))?;
			let mmap = map_region(&record.path, record.payload_offset, record.header.data_size as usize)?;
			log.install_bucket_ptr(bucket_idx, Box::new(Block::archived(mmap, bucket_len, encoding)))?;
			bucket_idx += 1;
		}
		log::info!(target: "confluo-storage", "reattached {} archived monolog buckets from {}", bucket_idx, prefix);
		Ok(bucket_idx)
	}

	/// Reattaches archived reflog and index buckets. Both action shapes
	/// carry `reflog_index`, the logical offset one past the archived
	/// bucket, so the bucket's position is recoverable from the action
	/// alone without needing a per-key stream position -- unlike the
	/// monolog-linear case, one filter's incremental files interleave
	/// buckets from many different keys.
	pub fn reload_reflog_buckets<'a>(
		dir: impl AsRef<Path>,
		prefix: &str,
		actions: &[ArchivalAction],
		reflog_for_key: impl Fn(&[u8]) -> &'a Reflog,
	) -> Result<usize> {
		let mut reader = IncrementalFileReader::new(dir, prefix);
		let bucket_size = Reflog::bucket_size();
		let mut count = 0usize;
		for action in actions {
			let (key, reflog_index) = match action {
				ArchivalAction::ReflogBucket { key, reflog_index, .. } => (key, *reflog_index),
				ArchivalAction::IndexBucket { key, reflog_index, .. } => (key, *reflog_index),
				_ => continue,
			};
			let record = reader
				.next_record()?
				.ok_or_else(|| Error::CorruptArchive("transaction log references a missing data record".into()))?;
			let encoding = Encoding::from_tag(record.header.aux.encoding)
				.ok_or_else(|| Error::CorruptArchive(format!("unknown encoding tag {}", record.header.aux.encoding)))?;
			let mmap = map_region(&record.path, record.payload_offset, record.header.data_size as usize)?;
			let bucket_idx = (reflog_index as usize / bucket_size).saturating_sub(1);
			let reflog = reflog_for_key(key);
			reflog.install_bucket_ptr(bucket_idx, Box::new(Block::archived(mmap, bucket_size, encoding)))?;
			log::debug!(target: "confluo-storage", "reattached reflog bucket {} for key {}", bucket_idx, crate::display::hex_truncated(key, 16));
			count += 1;
		}
		log::info!(target: "confluo-storage", "reattached {} archived reflog buckets from {}", count, prefix);
		Ok(count)
	}
}
