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

//! Concurrency-control disciplines coordinating a log's read tail against
//! its write tail. Both variants guarantee readers never observe a
//! partially-written record; they differ in whether that's enforced by
//! stalling writers (`ReadStalledTail`) or by stalling the read tail's
//! advance until earlier writes complete (`WriteStalledTail`).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

const UNINITIALIZED: u64 = u64::MAX;
const INITIALIZED: u64 = u64::MAX - 1;
const UPDATING: u64 = u64::MAX - 2;
const INVALIDATED: u64 = u64::MAX - 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStateValue {
	Uninitialized,
	Initialized,
	Updating,
	Invalidated,
	Updated(u64),
}

impl ObjectStateValue {
	pub(crate) fn from_raw(raw: u64) -> ObjectStateValue {
		match raw {
			UNINITIALIZED => ObjectStateValue::Uninitialized,
			INITIALIZED => ObjectStateValue::Initialized,
			UPDATING => ObjectStateValue::Updating,
			INVALIDATED => ObjectStateValue::Invalidated,
			id => ObjectStateValue::Updated(id),
		}
	}
}

/// The lifecycle state of a single logical record: starts uninitialized,
/// becomes initialized once its first write completes, and transitions
/// through `updating` to `updated(new_id)` on an in-place update.
#[derive(Debug)]
pub struct ObjectState {
	state: AtomicU64,
}

impl ObjectState {
	pub fn new() -> ObjectState {
		ObjectState { state: AtomicU64::new(UNINITIALIZED) }
	}

	pub fn initialize(&self) {
		self.state.store(INITIALIZED, Ordering::Release);
	}

	pub fn mark_updating(&self, expected: u64) -> bool {
		self.state.compare_exchange(expected, UPDATING, Ordering::AcqRel, Ordering::Acquire).is_ok()
	}

	pub fn update(&self, new_id: u64) {
		self.state.store(new_id, Ordering::Release);
	}

	/// Permanently marks the record invalid. Unlike `Updating`, this is a
	/// terminal state: no discipline's `mark_updating` expects it as the
	/// CAS target, so every future update attempt fails, and `observe`
	/// returns it immediately rather than spinning.
	pub fn invalidate(&self) {
		self.state.store(INVALIDATED, Ordering::Release);
	}

	pub fn get(&self) -> u64 {
		self.state.load(Ordering::Acquire)
	}

	pub fn value(&self) -> ObjectStateValue {
		ObjectStateValue::from_raw(self.get())
	}
}

impl Default for ObjectState {
	fn default() -> Self {
		ObjectState::new()
	}
}

pub trait ConcurrencyControl: Default {
	fn start_write_op(&self) -> u64;
	fn end_write_op(&self, tail: u64);
	fn init_object(&self, obj: &ObjectState);
	fn start_update_op(&self, obj: &ObjectState) -> bool;
	fn end_update_op(&self, obj: &ObjectState, new_id: u64) {
		obj.update(new_id);
	}
	fn get_tail(&self) -> u64;
	fn start_snapshot_op(&self) -> u64;
	fn end_snapshot_op(&self, tail: u64) -> bool;
	fn is_valid(state: u64) -> bool
	where
		Self: Sized;
	/// Reads an object's state, blocking until it leaves any transient
	/// phase the discipline considers unobservable by readers.
	fn observe(&self, obj: &ObjectState) -> u64 {
		obj.get()
	}
}

/// Readers never stall; writers advance the read tail only after every
/// write below their own completion point has finished, via a CAS-spin
/// that insists on observing exactly their own start position.
pub struct WriteStalledTail {
	read_tail: AtomicU64,
	write_tail: AtomicU64,
}

const HI_BIT: u64 = 1 << 63;
const RT_MASK: u64 = !HI_BIT;

impl WriteStalledTail {
	pub fn new() -> WriteStalledTail {
		WriteStalledTail { read_tail: AtomicU64::new(0), write_tail: AtomicU64::new(0) }
	}
}

impl Default for WriteStalledTail {
	fn default() -> Self {
		WriteStalledTail::new()
	}
}

impl ConcurrencyControl for WriteStalledTail {
	fn start_write_op(&self) -> u64 {
		self.write_tail.fetch_add(1, Ordering::AcqRel)
	}

	fn end_write_op(&self, tail: u64) {
		loop {
			let mut expected = tail;
			if self.read_tail.compare_exchange_weak(expected, tail + 1, Ordering::AcqRel, Ordering::Acquire).is_ok() {
				break;
			}
			let _ = &mut expected;
			std::hint::spin_loop();
		}
	}

	fn init_object(&self, _obj: &ObjectState) {}

	fn start_update_op(&self, obj: &ObjectState) -> bool {
		obj.mark_updating(UNINITIALIZED)
	}

	fn get_tail(&self) -> u64 {
		self.read_tail.load(Ordering::Acquire) & RT_MASK
	}

	fn start_snapshot_op(&self) -> u64 {
		let mut tail = self.get_tail();
		loop {
			match self.read_tail.compare_exchange_weak(tail, tail | HI_BIT, Ordering::AcqRel, Ordering::Acquire) {
				Ok(_) => return tail,
				Err(actual) => tail = actual & RT_MASK,
			}
		}
	}

	fn end_snapshot_op(&self, tail: u64) -> bool {
		let expected = tail | HI_BIT;
		self.read_tail.compare_exchange(expected, tail, Ordering::AcqRel, Ordering::Acquire).is_ok()
	}

	fn is_valid(state: u64) -> bool {
		state == UNINITIALIZED || state == UPDATING
	}
}

/// Writers stall briefly while a snapshot is in progress; there is a
/// single tail counter and no high-bit trick, so readers only ever see a
/// fully initialized object.
pub struct ReadStalledTail {
	tail: AtomicU64,
	snapshot_in_progress: AtomicBool,
}

impl ReadStalledTail {
	pub fn new() -> ReadStalledTail {
		ReadStalledTail { tail: AtomicU64::new(0), snapshot_in_progress: AtomicBool::new(false) }
	}
}

impl Default for ReadStalledTail {
	fn default() -> Self {
		ReadStalledTail::new()
	}
}

impl ConcurrencyControl for ReadStalledTail {
	fn start_write_op(&self) -> u64 {
		self.tail.fetch_add(1, Ordering::AcqRel)
	}

	fn end_write_op(&self, _tail: u64) {}

	fn init_object(&self, obj: &ObjectState) {
		while self.snapshot_in_progress.load(Ordering::Acquire) {
			std::hint::spin_loop();
		}
		obj.initialize();
	}

	fn start_update_op(&self, obj: &ObjectState) -> bool {
		obj.mark_updating(INITIALIZED)
	}

	fn get_tail(&self) -> u64 {
		self.tail.load(Ordering::Acquire)
	}

	fn start_snapshot_op(&self) -> u64 {
		self.snapshot_in_progress.store(true, Ordering::Release);
		self.get_tail()
	}

	fn end_snapshot_op(&self, _tail: u64) -> bool {
		self.snapshot_in_progress.store(false, Ordering::Release);
		true
	}

	fn is_valid(state: u64) -> bool {
		state == INITIALIZED
	}

	fn observe(&self, obj: &ObjectState) -> u64 {
		loop {
			let state = obj.get();
			if state != UNINITIALIZED && state != UPDATING {
				return state;
			}
			std::hint::spin_loop();
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn object_state_transitions() {
		let obj = ObjectState::new();
		assert_eq!(obj.value(), ObjectStateValue::Uninitialized);
		obj.initialize();
		assert_eq!(obj.value(), ObjectStateValue::Initialized);
		assert!(obj.mark_updating(INITIALIZED));
		assert_eq!(obj.value(), ObjectStateValue::Updating);
		obj.update(7);
		assert_eq!(obj.value(), ObjectStateValue::Updated(7));
	}

	#[test]
	fn write_stalled_advances_read_tail_in_order() {
		let cc = WriteStalledTail::new();
		let t0 = cc.start_write_op();
		let t1 = cc.start_write_op();
		assert_eq!((t0, t1), (0, 1));
		// end_write_op(1) must wait until end_write_op(0) has run, but this
		// is a single-threaded check that completion order, not stalling,
		// determines the observable tail.
		cc.end_write_op(0);
		assert_eq!(cc.get_tail(), 1);
		cc.end_write_op(1);
		assert_eq!(cc.get_tail(), 2);
	}

	#[test]
	fn write_stalled_snapshot_round_trips() {
		let cc = WriteStalledTail::new();
		cc.start_write_op();
		cc.end_write_op(0);
		let snap = cc.start_snapshot_op();
		assert_eq!(snap, 1);
		assert!(cc.end_snapshot_op(snap));
		assert_eq!(cc.get_tail(), 1);
	}

	#[test]
	fn read_stalled_tail_increments_without_stalling_writers() {
		let cc = ReadStalledTail::new();
		assert_eq!(cc.start_write_op(), 0);
		assert_eq!(cc.start_write_op(), 1);
		assert_eq!(cc.get_tail(), 2);
	}

	#[test]
	fn read_stalled_init_object_sets_initialized() {
		let cc = ReadStalledTail::new();
		let obj = ObjectState::new();
		cc.init_object(&obj);
		assert_eq!(obj.value(), ObjectStateValue::Initialized);
	}
}
