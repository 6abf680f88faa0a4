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

//! Packs two 16-bit reference counts into a single atomic 32-bit word: the
//! low 16 bits count references into the in-memory representation, the high
//! 16 bits count references into the archived representation.

use std::sync::atomic::{AtomicU32, Ordering};

const FIRST_DELTA: u32 = 1;
const SECOND_DELTA: u32 = 1 << 16;
const BOTH_DELTA: u32 = FIRST_DELTA + SECOND_DELTA;
const FIRST_MASK: u32 = (1 << 16) - 1;
const SECOND_SHIFT: u32 = 16;

#[derive(Debug)]
pub struct ReferenceCounts {
	counts: AtomicU32,
}

impl ReferenceCounts {
	pub fn new() -> ReferenceCounts {
		ReferenceCounts { counts: AtomicU32::new(BOTH_DELTA) }
	}

	pub fn increment_first(&self) {
		self.counts.fetch_add(FIRST_DELTA, Ordering::AcqRel);
	}

	pub fn increment_second(&self) {
		self.counts.fetch_add(SECOND_DELTA, Ordering::AcqRel);
	}

	pub fn increment_both(&self) {
		self.counts.fetch_add(BOTH_DELTA, Ordering::AcqRel);
	}

	pub fn decrement_first(&self) {
		self.counts.fetch_sub(FIRST_DELTA, Ordering::AcqRel);
	}

	pub fn decrement_second(&self) {
		self.counts.fetch_sub(SECOND_DELTA, Ordering::AcqRel);
	}

	pub fn decrement_both(&self) {
		self.counts.fetch_sub(BOTH_DELTA, Ordering::AcqRel);
	}

	/// Decrements the first counter; returns true if it dropped to zero.
	pub fn decrement_first_and_compare(&self) -> bool {
		(self.counts.fetch_sub(FIRST_DELTA, Ordering::AcqRel) & FIRST_MASK) == 1
	}

	/// Decrements the second counter; returns true if it dropped to zero.
	pub fn decrement_second_and_compare(&self) -> bool {
		(self.counts.fetch_sub(SECOND_DELTA, Ordering::AcqRel) >> SECOND_SHIFT) == 1
	}
}

impl Default for ReferenceCounts {
	fn default() -> Self {
		ReferenceCounts::new()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn starts_with_one_reference_on_each_side() {
		// Draining the initial reference on each side independently should
		// report reaching zero exactly once per side.
		let rc = ReferenceCounts::new();
		assert!(rc.decrement_first_and_compare());
		assert!(rc.decrement_second_and_compare());
	}

	#[test]
	fn independent_counters_do_not_interfere() {
		let rc = ReferenceCounts::new();
		rc.increment_first();
		rc.increment_second();
		// first: 2 -> 1 -> 0, second still untouched at 2
		assert!(!rc.decrement_first_and_compare());
		assert!(rc.decrement_first_and_compare());
		assert!(!rc.decrement_second_and_compare());
		assert!(rc.decrement_second_and_compare());
	}
}
