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

//! A filter pairs a predicate with a radix index keyed by a
//! fixed-resolution timestamp block. The predicate and the bucketing
//! function it runs under are schema/expression-compiler concerns owned by
//! a collaborator; this module only provides the mechanism they're built
//! from, so a collaborator can wire one up without reimplementing
//! radix/reflog plumbing.

use crate::index::radix_tree::RadixTree;
use crate::index::reflog::Reflog;
use crate::monolog::MonoLog;

const FANOUT_BITS: usize = 8;
const KEY_BYTES: usize = 8;

pub struct Filter {
	predicate: Box<dyn Fn(&[u8]) -> bool + Send + Sync>,
	time_block_ms: u64,
	index: RadixTree<Reflog, FANOUT_BITS>,
}

impl Filter {
	pub fn new(predicate: Box<dyn Fn(&[u8]) -> bool + Send + Sync>, time_block_ms: u64) -> Filter {
		Filter { predicate, time_block_ms, index: RadixTree::new(KEY_BYTES) }
	}

	pub fn time_block(&self, timestamp_ms: u64) -> u64 {
		timestamp_ms / self.time_block_ms
	}

	/// Evaluates the predicate against `record`; if it matches, appends
	/// `record_offset` to the reflog for `timestamp_ms`'s time block.
	/// Returns whether the record matched.
	pub fn update(&self, timestamp_ms: u64, record: &[u8], record_offset: u64) -> bool {
		if !(self.predicate)(record) {
			return false;
		}
		let key = self.time_block(timestamp_ms).to_be_bytes();
		self.index.get_or_create(&key).push_back(record_offset);
		true
	}

	pub fn lookup(&self, timestamp_ms: u64) -> Option<&Reflog> {
		let key = self.time_block(timestamp_ms).to_be_bytes();
		self.index.lookup(&key)
	}

	pub fn range_lookup(&self, lo_ms: u64, hi_ms: u64) -> Vec<(u64, &Reflog)> {
		let lo = self.time_block(lo_ms).to_be_bytes();
		let hi = self.time_block(hi_ms).to_be_bytes();
		self.index
			.range_lookup(&lo, &hi)
			.into_iter()
			.map(|(key_bytes, reflog)| {
				let mut arr = [0u8; KEY_BYTES];
				arr.copy_from_slice(&key_bytes);
				(u64::from_be_bytes(arr), reflog)
			})
			.collect()
	}
}
