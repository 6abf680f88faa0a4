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

//! Fixed-fan-out, byte-keyed radix tree. Each level consumes `FANOUT_BITS`
//! bits of the key and fans out into `2^FANOUT_BITS` children; a path from
//! root to leaf is `ceil(key_bits / FANOUT_BITS)` levels. Leaves are
//! created at most once: concurrent `get_or_create` calls race via CAS and
//! the losers drop their own allocation and observe the winner's leaf.
//! Nodes are never removed, so raw pointers read under the tree's lifetime
//! are always valid.

use std::sync::atomic::{AtomicPtr, Ordering};

enum Node<V> {
	Internal(Vec<AtomicPtr<Node<V>>>),
	Leaf(V),
}

/// Accumulates big-endian bits into a byte buffer, the inverse of the bit
/// extraction `get_or_create`/`lookup` perform while descending.
struct BitAccumulator {
	bytes: Vec<u8>,
	bit_len: usize,
}

impl BitAccumulator {
	fn new() -> BitAccumulator {
		BitAccumulator { bytes: Vec::new(), bit_len: 0 }
	}

	fn push(&mut self, value: usize, nbits: usize) {
		for i in (0..nbits).rev() {
			let bit = (value >> i) & 1;
			let byte_index = self.bit_len / 8;
			if byte_index == self.bytes.len() {
				self.bytes.push(0);
			}
			let bit_in_byte = 7 - (self.bit_len % 8);
			self.bytes[byte_index] |= (bit as u8) << bit_in_byte;
			self.bit_len += 1;
		}
	}

	fn into_bytes(mut self, key_bytes: usize) -> Vec<u8> {
		self.bytes.resize(key_bytes, 0);
		self.bytes
	}
}

fn extract_bits(key: &[u8], bit_offset: usize, nbits: usize) -> usize {
	let mut value = 0usize;
	for i in 0..nbits {
		let bit_index = bit_offset + i;
		let byte_index = bit_index / 8;
		let bit_in_byte = 7 - (bit_index % 8);
		let bit = if byte_index < key.len() { (key[byte_index] >> bit_in_byte) & 1 } else { 0 };
		value = (value << 1) | bit as usize;
	}
	value
}

pub struct RadixTree<V: Default, const FANOUT_BITS: usize> {
	root: Vec<AtomicPtr<Node<V>>>,
	key_bytes: usize,
	depth: usize,
}

impl<V: Default, const FANOUT_BITS: usize> RadixTree<V, FANOUT_BITS> {
	pub fn new(key_bytes: usize) -> Self {
		let key_bits = key_bytes * 8;
		let depth = std::cmp::max(1, (key_bits + FANOUT_BITS - 1) / FANOUT_BITS);
		RadixTree { root: Self::fresh_children(), key_bytes, depth }
	}

	fn fresh_children() -> Vec<AtomicPtr<Node<V>>> {
		(0..(1usize << FANOUT_BITS)).map(|_| AtomicPtr::new(std::ptr::null_mut())).collect()
	}

	fn get_or_create_slot(slot: &AtomicPtr<Node<V>>, leaf: bool) -> *mut Node<V> {
		let mut ptr = slot.load(Ordering::Acquire);
		if ptr.is_null() {
			let boxed: Box<Node<V>> =
				if leaf { Box::new(Node::Leaf(V::default())) } else { Box::new(Node::Internal(Self::fresh_children())) };
			let new_ptr = Box::into_raw(boxed);
			match slot.compare_exchange(std::ptr::null_mut(), new_ptr, Ordering::AcqRel, Ordering::Acquire) {
				Ok(_) => ptr = new_ptr,
				Err(actual) => {
					// Safety: `new_ptr` was never published, so we hold the only reference.
					unsafe { drop(Box::from_raw(new_ptr)) };
					ptr = actual;
				}
			}
		}
		ptr
	}

	/// Descends to `key`'s leaf, CAS-installing any missing node along the
	/// path. Concurrent creators of the same leaf race; exactly one wins.
	pub fn get_or_create(&self, key: &[u8]) -> &V {
		let mut level = 0;
		let idx = extract_bits(key, 0, FANOUT_BITS);
		let mut ptr = Self::get_or_create_slot(&self.root[idx], self.depth == 1);
		level += 1;
		while level < self.depth {
			let children = match unsafe { &*ptr } {
				Node::Internal(c) => c,
				Node::Leaf(_) => unreachable!("radix tree depth mismatch"),
			};
			let idx = extract_bits(key, level * FANOUT_BITS, FANOUT_BITS);
			let is_last = level + 1 == self.depth;
			ptr = Self::get_or_create_slot(&children[idx], is_last);
			level += 1;
		}
		match unsafe { &*ptr } {
			Node::Leaf(v) => v,
			Node::Internal(_) => unreachable!("radix tree depth mismatch"),
		}
	}

	/// Descends to `key`'s leaf without creating anything; returns `None`
	/// if any node along the path is absent.
	pub fn lookup(&self, key: &[u8]) -> Option<&V> {
		let idx = extract_bits(key, 0, FANOUT_BITS);
		let mut ptr = self.root[idx].load(Ordering::Acquire);
		if ptr.is_null() {
			return None;
		}
		let mut level = 1;
		while level < self.depth {
			let children = match unsafe { &*ptr } {
				Node::Internal(c) => c,
				Node::Leaf(_) => return None,
			};
			let idx = extract_bits(key, level * FANOUT_BITS, FANOUT_BITS);
			ptr = children[idx].load(Ordering::Acquire);
			if ptr.is_null() {
				return None;
			}
			level += 1;
		}
		match unsafe { &*ptr } {
			Node::Leaf(v) => Some(v),
			Node::Internal(_) => None,
		}
	}

	/// Lexical traversal of every leaf whose reconstructed key falls in
	/// `[lo, hi]`. Lexical order equals numeric order because keys are
	/// fixed-width big-endian byte strings.
	pub fn range_lookup(&self, lo: &[u8], hi: &[u8]) -> Vec<(Vec<u8>, &V)> {
		let mut out = Vec::new();
		let mut prefix = BitAccumulator::new();
		self.collect(&self.root, 1, &mut prefix, lo, hi, &mut out);
		out
	}

	fn collect<'a>(
		&'a self,
		children: &'a [AtomicPtr<Node<V>>],
		level: usize,
		prefix: &mut BitAccumulator,
		lo: &[u8],
		hi: &[u8],
		out: &mut Vec<(Vec<u8>, &'a V)>,
	) {
		for (idx, slot) in children.iter().enumerate() {
			let ptr = slot.load(Ordering::Acquire);
			if ptr.is_null() {
				continue;
			}
			let mut child_prefix = BitAccumulator { bytes: prefix.bytes.clone(), bit_len: prefix.bit_len };
			child_prefix.push(idx, FANOUT_BITS);
			match unsafe { &*ptr } {
				Node::Internal(c) => self.collect(c, level + 1, &mut child_prefix, lo, hi, out),
				Node::Leaf(v) => {
					let key = child_prefix.into_bytes(self.key_bytes);
					if key.as_slice() >= lo && key.as_slice() <= hi {
						out.push((key, v));
					}
				}
			}
		}
	}

	fn free_node(ptr: *mut Node<V>) {
		if ptr.is_null() {
			return;
		}
		// Safety: nodes are never unpublished while the tree is alive; this
		// only runs from `Drop`, after which no other reference can exist.
		let node = unsafe { Box::from_raw(ptr) };
		if let Node::Internal(children) = *node {
			for slot in &children {
				Self::free_node(slot.load(Ordering::Acquire));
			}
		}
	}
}

impl<V: Default, const FANOUT_BITS: usize> Drop for RadixTree<V, FANOUT_BITS> {
	fn drop(&mut self) {
		for slot in &self.root {
			Self::free_node(slot.load(Ordering::Acquire));
		}
	}
}

unsafe impl<V: Send + Default, const FANOUT_BITS: usize> Send for RadixTree<V, FANOUT_BITS> {}
unsafe impl<V: Sync + Default, const FANOUT_BITS: usize> Sync for RadixTree<V, FANOUT_BITS> {}

#[cfg(test)]
mod test {
	use super::*;
	use std::sync::{Arc, Mutex};
	use std::thread;

	// `get_or_create` hands back a shared `&V`; a leaf type needs its own
	// interior mutability to be written through it. `Reflog` has that built
	// in via its `MonoLog` impl, so these tests use a plain `Mutex` instead.
	type SmallTree = RadixTree<Mutex<Vec<u32>>, 2>;

	#[test]
	fn get_or_create_then_lookup_round_trips() {
		let tree: SmallTree = RadixTree::new(1);
		tree.get_or_create(&[0b01_10_11_00]).lock().unwrap().push(42);
		let found = tree.lookup(&[0b01_10_11_00]).unwrap();
		assert_eq!(*found.lock().unwrap(), vec![42]);
		assert!(tree.lookup(&[0xFF]).is_none());
	}

	#[test]
	fn concurrent_get_or_create_races_to_a_single_leaf() {
		let tree: Arc<SmallTree> = Arc::new(RadixTree::new(1));
		let key = [0b11_00_10_01u8];
		let handles: Vec<_> = (0..8)
			.map(|i| {
				let tree = tree.clone();
				thread::spawn(move || {
					let leaf_ptr = tree.get_or_create(&key) as *const Mutex<Vec<u32>> as usize;
					(i, leaf_ptr)
				})
			})
			.collect();
		let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
		let first_ptr = results[0].1;
		assert!(results.iter().all(|(_, ptr)| *ptr == first_ptr));
	}

	#[test]
	fn range_lookup_returns_keys_within_bounds() {
		let tree: RadixTree<Mutex<Vec<u32>>, 4> = RadixTree::new(1);
		tree.get_or_create(&[5]).lock().unwrap().push(1);
		tree.get_or_create(&[7]).lock().unwrap().push(2);
		tree.get_or_create(&[200]).lock().unwrap().push(3);
		let found = tree.range_lookup(&[5], &[10]);
		let mut keys: Vec<u8> = found.iter().map(|(k, _)| k[0]).collect();
		keys.sort_unstable();
		assert_eq!(keys, vec![5, 7]);
	}
}
