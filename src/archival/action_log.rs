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

//! The transaction log records one variable-length action per committed
//! archival step, appended and flushed before the corresponding bucket
//! pointer is swapped. Each record carries a CRC32 checksum of its body so
//! a reader can tell a genuinely committed record from a torn write left
//! by a crash mid-append, and stop replay there rather than
//! misinterpreting trailing garbage.

use std::convert::TryInto;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchivalAction {
	/// Offset up to which a monolog-linear structure is archived.
	MonologLinear { tail: u64 },
	/// A single reflog bucket has been archived.
	ReflogBucket { key: Vec<u8>, reflog_index: u64, data_log_offset: u64 },
	/// Aggregates for the reflog keyed by `key` have been flushed.
	ReflogAggregatesFlushed { key: Vec<u8> },
	/// A single index (radix tree) bucket has been archived.
	IndexBucket { key: Vec<u8>, reflog_index: u64, data_log_offset: u64 },
}

const TAG_MONOLOG_LINEAR: u8 = 0;
const TAG_REFLOG_BUCKET: u8 = 1;
const TAG_REFLOG_AGGREGATES: u8 = 2;
const TAG_INDEX_BUCKET: u8 = 3;

impl ArchivalAction {
	fn body_to_bytes(&self) -> Vec<u8> {
		let mut buf = Vec::new();
		match self {
			ArchivalAction::MonologLinear { tail } => {
				buf.push(TAG_MONOLOG_LINEAR);
				buf.extend_from_slice(&tail.to_le_bytes());
			}
			ArchivalAction::ReflogBucket { key, reflog_index, data_log_offset } => {
				buf.push(TAG_REFLOG_BUCKET);
				buf.extend_from_slice(&(key.len() as u64).to_le_bytes());
				buf.extend_from_slice(key);
				buf.extend_from_slice(&reflog_index.to_le_bytes());
				buf.extend_from_slice(&data_log_offset.to_le_bytes());
			}
			ArchivalAction::ReflogAggregatesFlushed { key } => {
				buf.push(TAG_REFLOG_AGGREGATES);
				buf.extend_from_slice(&(key.len() as u64).to_le_bytes());
				buf.extend_from_slice(key);
			}
			ArchivalAction::IndexBucket { key, reflog_index, data_log_offset } => {
				buf.push(TAG_INDEX_BUCKET);
				buf.extend_from_slice(&(key.len() as u64).to_le_bytes());
				buf.extend_from_slice(key);
				buf.extend_from_slice(&reflog_index.to_le_bytes());
				buf.extend_from_slice(&data_log_offset.to_le_bytes());
			}
		}
		buf
	}

	/// Encodes this action as `[body_len: u32][body][crc32(body): u32]`.
	pub fn to_record_bytes(&self) -> Vec<u8> {
		let body = self.body_to_bytes();
		let mut record = Vec::with_capacity(4 + body.len() + 4);
		record.extend_from_slice(&(body.len() as u32).to_le_bytes());
		record.extend_from_slice(&body);
		record.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
		record
	}

	fn body_from_bytes(body: &[u8]) -> Result<ArchivalAction> {
		if body.is_empty() {
			return Err(Error::CorruptArchive("empty action record".into()));
		}
		let tag = body[0];
		let rest = &body[1..];
		let read_u64 = |buf: &[u8], off: usize| -> Result<u64> {
			let bytes: [u8; 8] =
				buf.get(off..off + 8).ok_or_else(|| Error::CorruptArchive("truncated action record".into()))?.try_into().unwrap();
			Ok(u64::from_le_bytes(bytes))
		};
		let read_keyed = |buf: &[u8]| -> Result<(Vec<u8>, usize)> {
			let key_len = read_u64(buf, 0)? as usize;
			let key = buf.get(8..8 + key_len).ok_or_else(|| Error::CorruptArchive("truncated action key".into()))?.to_vec();
			Ok((key, 8 + key_len))
		};
		match tag {
			TAG_MONOLOG_LINEAR => Ok(ArchivalAction::MonologLinear { tail: read_u64(rest, 0)? }),
			TAG_REFLOG_BUCKET => {
				let (key, off) = read_keyed(rest)?;
				Ok(ArchivalAction::ReflogBucket { key, reflog_index: read_u64(rest, off)?, data_log_offset: read_u64(rest, off + 8)? })
			}
			TAG_REFLOG_AGGREGATES => {
				let (key, _) = read_keyed(rest)?;
				Ok(ArchivalAction::ReflogAggregatesFlushed { key })
			}
			TAG_INDEX_BUCKET => {
				let (key, off) = read_keyed(rest)?;
				Ok(ArchivalAction::IndexBucket { key, reflog_index: read_u64(rest, off)?, data_log_offset: read_u64(rest, off + 8)? })
			}
			_ => Err(Error::CorruptArchive(format!("unknown action tag {}", tag))),
		}
	}
}

/// An append-only, crash-safe log of committed archival actions.
pub struct ActionLog {
	file: File,
}

impl ActionLog {
	pub fn open<P: AsRef<Path>>(path: P) -> Result<ActionLog> {
		let file = OpenOptions::new().create(true).read(true).append(true).open(path)?;
		Ok(ActionLog { file })
	}

	/// Appends and flushes one action record. Matches the teacher
	/// allocator's discipline of flushing before the corresponding state
	/// transition becomes externally visible.
	pub fn commit(&mut self, action: &ArchivalAction) -> Result<()> {
		self.file.write_all(&action.to_record_bytes())?;
		self.file.flush()?;
		self.file.sync_data()?;
		log::debug!(target: "confluo-storage", "committed archival action {:?}", action);
		Ok(())
	}

	/// Replays every well-formed record from the start of the log. Stops
	/// at the first truncated or checksum-mismatched record rather than
	/// erroring, since that's exactly the shape a crash mid-append leaves:
	/// everything before it is a committed prefix, and replay must resume
	/// from there.
	pub fn replay<P: AsRef<Path>>(path: P) -> Result<(Vec<ArchivalAction>, u64)> {
		let mut file = match File::open(path) {
			Ok(f) => f,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
			Err(e) => return Err(e.into()),
		};
		let mut bytes = Vec::new();
		file.read_to_end(&mut bytes)?;

		let mut actions = Vec::new();
		let mut pos = 0u64;
		let mut cursor = 0usize;
		while cursor + 4 <= bytes.len() {
			let body_len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
			let body_start = cursor + 4;
			let body_end = body_start + body_len;
			let crc_end = body_end + 4;
			if crc_end > bytes.len() {
				break;
			}
			let body = &bytes[body_start..body_end];
			let stored_crc = u32::from_le_bytes(bytes[body_end..crc_end].try_into().unwrap());
			if crc32fast::hash(body) != stored_crc {
				break;
			}
			match ArchivalAction::body_from_bytes(body) {
				Ok(action) => actions.push(action),
				Err(_) => break,
			}
			cursor = crc_end;
			pos = cursor as u64;
		}
		Ok((actions, pos))
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::io::Seek;

	struct TempDir(std::path::PathBuf);

	impl TempDir {
		fn new(name: &str) -> TempDir {
			let mut dir = std::env::temp_dir();
			dir.push(format!("confluo-storage-test-{}-{}", name, std::process::id()));
			std::fs::create_dir_all(&dir).unwrap();
			TempDir(dir)
		}

		fn path(&self, name: &str) -> std::path::PathBuf {
			self.0.join(name)
		}
	}

	impl Drop for TempDir {
		fn drop(&mut self) {
			let _ = std::fs::remove_dir_all(&self.0);
		}
	}

	#[test]
	fn commits_replay_in_order() {
		let dir = TempDir::new("action-log-replay");
		let path = dir.path("transaction_log.dat");
		{
			let mut log = ActionLog::open(&path).unwrap();
			log.commit(&ArchivalAction::MonologLinear { tail: 10 }).unwrap();
			log.commit(&ArchivalAction::ReflogBucket { key: vec![1, 2], reflog_index: 3, data_log_offset: 40 }).unwrap();
		}
		let (actions, _) = ActionLog::replay(&path).unwrap();
		assert_eq!(actions, vec![
			ArchivalAction::MonologLinear { tail: 10 },
			ArchivalAction::ReflogBucket { key: vec![1, 2], reflog_index: 3, data_log_offset: 40 },
		]);
	}

	#[test]
	fn replay_stops_at_truncated_tail_record() {
		let dir = TempDir::new("action-log-truncated");
		let path = dir.path("transaction_log.dat");
		{
			let mut log = ActionLog::open(&path).unwrap();
			log.commit(&ArchivalAction::MonologLinear { tail: 10 }).unwrap();
		}
		// Simulate a crash mid-write of a second record: append a partial,
		// unterminated record.
		{
			let mut file = OpenOptions::new().append(true).open(&path).unwrap();
			file.write_all(&[5, 0, 0, 0, 1, 2, 3]).unwrap();
			file.seek(std::io::SeekFrom::End(0)).unwrap();
		}
		let (actions, committed_len) = ActionLog::replay(&path).unwrap();
		assert_eq!(actions, vec![ArchivalAction::MonologLinear { tail: 10 }]);
		assert_eq!(committed_len, std::fs::metadata(&path).unwrap().len() - 7);
	}
}
