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

//! The payload a swappable pointer can hold: either an owned, mutable
//! in-memory array, or an mmap'd, possibly-encoded, archived array. Both
//! carry the same `ptr_metadata`-style header (aux block, element count).

use std::borrow::Cow;

use crate::error::Result;
use crate::storage::codec::{self, Encoding};
use crate::storage::ptr_metadata::AuxBlock;

pub(crate) enum Payload<T> {
	Owned(Box<[T]>),
	Mapped { mmap: memmap2::Mmap, len: usize },
}

/// A single allocation backing a `MonoLog` bucket: its archival aux block
/// plus either the raw in-memory array or an mmap'd archived one.
pub struct Block<T> {
	pub(crate) aux: AuxBlock,
	pub(crate) encoding: Encoding,
	payload: Payload<T>,
}

impl<T: Copy> Block<T> {
	pub fn in_memory(data: Box<[T]>) -> Block<T> {
		Block { aux: AuxBlock::in_memory(Encoding::Identity.tag()), encoding: Encoding::Identity, payload: Payload::Owned(data) }
	}

	pub fn archived(mmap: memmap2::Mmap, len: usize, encoding: Encoding) -> Block<T> {
		Block { aux: AuxBlock::archived(encoding.tag()), encoding, payload: Payload::Mapped { mmap, len } }
	}

	pub fn len(&self) -> usize {
		match &self.payload {
			Payload::Owned(b) => b.len(),
			Payload::Mapped { len, .. } => *len,
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Borrows the decoded contents. Identity-encoded and owned blocks are
	/// borrowed directly at zero cost; compressed archived blocks are
	/// decoded into a fresh buffer on every call.
	pub fn as_slice(&self) -> Result<Cow<[T]>> {
		match &self.payload {
			Payload::Owned(b) => Ok(Cow::Borrowed(&b[..])),
			Payload::Mapped { mmap, len } => {
				if self.encoding == Encoding::Identity {
					let ptr = mmap.as_ptr() as *const T;
					// Safety: the mmap was sized as `len * size_of::<T>()` bytes by
					// the writer that created this archive entry (`archival::archiver`).
					let slice = unsafe { std::slice::from_raw_parts(ptr, *len) };
					Ok(Cow::Borrowed(slice))
				} else {
					let decoded_bytes = codec::decode(self.encoding, &mmap[..])?;
					let elem_size = std::mem::size_of::<T>();
					if decoded_bytes.len() != *len * elem_size {
						return Err(crate::error::Error::CorruptArchive(format!(
							"decoded {} bytes, expected {}",
							decoded_bytes.len(),
							*len * elem_size
						)));
					}
					let ptr = decoded_bytes.as_ptr() as *const T;
					// Safety: length was just checked against `len * size_of::<T>()`.
					let values: Vec<T> = unsafe { std::slice::from_raw_parts(ptr, *len).to_vec() };
					Ok(Cow::Owned(values))
				}
			}
		}
	}

	pub fn is_in_memory(&self) -> bool {
		matches!(self.payload, Payload::Owned(_))
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn owned_block_borrows_without_copy() {
		let block = Block::in_memory(vec![1u64, 2, 3].into_boxed_slice());
		match block.as_slice().unwrap() {
			Cow::Borrowed(s) => assert_eq!(s, &[1, 2, 3]),
			Cow::Owned(_) => panic!("expected a borrow"),
		}
	}
}
