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

//! Recognized configuration options for the storage engine, with the same
//! defaults as the original configuration parameters.

use crate::storage::codec::Encoding;

pub const DEFAULT_MAX_MEMORY: u64 = 1_000_000_000;
pub const DEFAULT_INDEX_BLOCK_SIZE: f64 = 1.0;
pub const DEFAULT_ARCHIVAL_PERIODICITY_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_MAX_ARCHIVAL_FILE_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct StorageOptions {
	/// Soft cap on bytes tracked by the storage allocator.
	pub max_memory: u64,
	/// Upper bound on concurrent writers/readers the engine is tuned for.
	pub max_concurrency: usize,
	/// Relative size of an index block, used to size radix tree leaves.
	pub index_block_size: f64,
	/// How often the archiver sweeps eligible buckets, in milliseconds.
	pub archival_periodicity_ms: u64,
	/// Cap on a single archive data file before rotating to the next one.
	pub max_archival_file_size: u64,
	/// Encoding applied to data log buckets during archival.
	pub data_log_archival_encoding: Encoding,
	/// Encoding applied to reflog buckets during archival.
	pub reflog_archival_encoding: Encoding,
}

impl Default for StorageOptions {
	fn default() -> Self {
		StorageOptions {
			max_memory: DEFAULT_MAX_MEMORY,
			max_concurrency: num_cpus(),
			index_block_size: DEFAULT_INDEX_BLOCK_SIZE,
			archival_periodicity_ms: DEFAULT_ARCHIVAL_PERIODICITY_MS,
			max_archival_file_size: DEFAULT_MAX_ARCHIVAL_FILE_SIZE,
			data_log_archival_encoding: Encoding::Identity,
			reflog_archival_encoding: Encoding::Identity,
		}
	}
}

fn num_cpus() -> usize {
	std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn defaults_match_reference_values() {
		let opts = StorageOptions::default();
		assert_eq!(opts.max_memory, 1_000_000_000);
		assert_eq!(opts.index_block_size, 1.0);
		assert_eq!(opts.archival_periodicity_ms, 300_000);
		assert_eq!(opts.max_archival_file_size, 64 * 1024 * 1024);
		assert!(opts.max_concurrency >= 1);
	}
}
