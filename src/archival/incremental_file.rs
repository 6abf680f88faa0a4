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

//! Rotating, append-only data files: `{prefix}_0.dat`, `{prefix}_1.dat`,
//! ... each capped at a configured size. A writer always appends to the
//! highest-numbered file that still has room, opening the next one once
//! it doesn't. Every record is `(pointer_metadata_header, payload)`, so a
//! reader can recover each payload's length without consulting anything
//! outside the data files themselves.

use std::fs::{File, OpenOptions};
use std::io::{Read as _, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::storage::ptr_metadata::PtrMetadata;

pub struct IncrementalFileWriter {
	dir: PathBuf,
	prefix: String,
	max_file_size: u64,
	file_num: u64,
	cur_file: File,
	cur_len: u64,
}

impl IncrementalFileWriter {
	pub fn new<P: AsRef<Path>>(dir: P, prefix: &str, max_file_size: u64) -> Result<IncrementalFileWriter> {
		std::fs::create_dir_all(&dir)?;
		let dir = dir.as_ref().to_path_buf();
		let file_num = 0;
		let (cur_file, cur_len) = Self::open_file(&dir, prefix, file_num)?;
		Ok(IncrementalFileWriter { dir, prefix: prefix.to_string(), max_file_size, file_num, cur_file, cur_len })
	}

	pub(crate) fn file_path(dir: &Path, prefix: &str, file_num: u64) -> PathBuf {
		dir.join(format!("{}_{}.dat", prefix, file_num))
	}

	fn open_file(dir: &Path, prefix: &str, file_num: u64) -> Result<(File, u64)> {
		let path = Self::file_path(dir, prefix, file_num);
		let file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
		let len = file.metadata()?.len();
		Ok((file, len))
	}

	fn fits(&self, additional: u64) -> bool {
		self.cur_len + additional <= self.max_file_size
	}

	/// Appends `(header, payload)` as one record, rotating to a new file
	/// first if it wouldn't fit in the current one. Returns the path and
	/// the offset the header starts at.
	pub fn append_record(&mut self, header: &PtrMetadata, payload: &[u8]) -> Result<(PathBuf, u64)> {
		let total_len = 8 + payload.len() as u64;
		if !self.fits(total_len) && self.cur_len > 0 {
			self.file_num += 1;
			let (file, len) = Self::open_file(&self.dir, &self.prefix, self.file_num)?;
			self.cur_file = file;
			self.cur_len = len;
		}
		let path = Self::file_path(&self.dir, &self.prefix, self.file_num);
		let offset = self.cur_len;
		self.cur_file.write_all(&header.to_bytes())?;
		self.cur_file.write_all(payload)?;
		self.cur_file.flush()?;
		self.cur_len += total_len;
		Ok((path, offset))
	}

	pub fn current_file_num(&self) -> u64 {
		self.file_num
	}
}

/// Reads the fixed 8-byte pointer metadata header at `offset`.
pub fn read_header<P: AsRef<Path>>(path: P, offset: u64) -> Result<PtrMetadata> {
	use std::io::{Seek, SeekFrom};
	let mut file = File::open(path)?;
	file.seek(SeekFrom::Start(offset))?;
	let mut buf = [0u8; 8];
	file.read_exact(&mut buf)?;
	Ok(PtrMetadata::from_bytes(&buf))
}

/// Maps an already-written region of an incremental data file for
/// read-only archived access.
pub fn map_region<P: AsRef<Path>>(path: P, offset: u64, len: usize) -> Result<memmap2::Mmap> {
	let file = File::open(path)?;
	// Safety: the region was written and flushed by `IncrementalFileWriter`
	// before this call, and archived files are never truncated except by
	// crash-recovery truncation which runs before any new mmap of them.
	let mmap = unsafe { memmap2::MmapOptions::new().offset(offset).len(len).map(&file)? };
	Ok(mmap)
}

/// A single `(header, payload)` record read back sequentially.
pub struct Record {
	pub header: PtrMetadata,
	pub path: PathBuf,
	pub payload_offset: u64,
}

/// Sequentially streams every committed record across a prefix's rotated
/// data files, in write order, advancing across file boundaries the same
/// way `IncrementalFileWriter` rotated through them. Used by crash
/// recovery, which has no other way to know where each archived payload
/// landed since the transaction log only records logical progress, not
/// physical offsets.
pub struct IncrementalFileReader {
	dir: PathBuf,
	prefix: String,
	file_num: u64,
	pos: u64,
	len: u64,
}

impl IncrementalFileReader {
	pub fn new<P: AsRef<Path>>(dir: P, prefix: &str) -> IncrementalFileReader {
		IncrementalFileReader { dir: dir.as_ref().to_path_buf(), prefix: prefix.to_string(), file_num: 0, pos: 0, len: u64::MAX }
	}

	fn cur_path(&self) -> PathBuf {
		IncrementalFileWriter::file_path(&self.dir, &self.prefix, self.file_num)
	}

	/// Reads the next record, or `None` once no more data files exist or
	/// the current file is exhausted without a further rotation.
	pub fn next_record(&mut self) -> Result<Option<Record>> {
		loop {
			let path = self.cur_path();
			let meta = match std::fs::metadata(&path) {
				Ok(m) => m,
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
				Err(e) => return Err(e.into()),
			};
			self.len = meta.len();
			if self.pos + 8 > self.len {
				if self.pos == 0 {
					return Ok(None);
				}
				self.file_num += 1;
				self.pos = 0;
				continue;
			}
			let header = read_header(&path, self.pos)?;
			let payload_offset = self.pos + 8;
			let payload_end = payload_offset + header.data_size as u64;
			if payload_end > self.len {
				return Err(Error::CorruptArchive(format!("record at {}:{} overruns file", path.display(), self.pos)));
			}
			self.pos = payload_end;
			return Ok(Some(Record { header, path, payload_offset }));
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::storage::ptr_metadata::AuxBlock;

	struct TempDir(PathBuf);

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

	fn header(data_size: u32) -> PtrMetadata {
		PtrMetadata::new(data_size, crate::storage::ptr_metadata::ALLOC_MMAP, AuxBlock::archived(0))
	}

	#[test]
	fn appends_stay_in_one_file_until_it_is_full() {
		let dir = TempDir::new("incr-file-single");
		let mut writer = IncrementalFileWriter::new(&dir.0, "data", 1024).unwrap();
		let (path1, off1) = writer.append_record(&header(3), &[1, 2, 3]).unwrap();
		let (path2, off2) = writer.append_record(&header(2), &[4, 5]).unwrap();
		assert_eq!(path1, path2);
		assert_eq!(off1, 0);
		assert_eq!(off2, 11);
	}

	#[test]
	fn rotates_to_a_new_file_once_capacity_is_exceeded() {
		let dir = TempDir::new("incr-file-rotate");
		let mut writer = IncrementalFileWriter::new(&dir.0, "data", 12).unwrap();
		let (path1, _) = writer.append_record(&header(3), &[1, 2, 3]).unwrap();
		let (path2, off2) = writer.append_record(&header(2), &[4, 5]).unwrap();
		assert_ne!(path1, path2);
		assert_eq!(off2, 0);
		assert_eq!(writer.current_file_num(), 1);
	}

	#[test]
	fn map_region_reads_back_written_bytes() {
		let dir = TempDir::new("incr-file-map");
		let mut writer = IncrementalFileWriter::new(&dir.0, "data", 1024).unwrap();
		let (path, off) = writer.append_record(&header(4), &[9, 8, 7, 6]).unwrap();
		let mmap = map_region(&path, off + 8, 4).unwrap();
		assert_eq!(&mmap[..], &[9, 8, 7, 6]);
	}

	#[test]
	fn read_header_recovers_the_stored_payload_length() {
		let dir = TempDir::new("incr-file-header");
		let mut writer = IncrementalFileWriter::new(&dir.0, "data", 1024).unwrap();
		let (path, off) = writer.append_record(&header(4), &[9, 8, 7, 6]).unwrap();
		let decoded = read_header(&path, off).unwrap();
		assert_eq!(decoded.data_size, 4);
	}

	#[test]
	fn reader_streams_records_across_a_rotated_file_boundary() {
		let dir = TempDir::new("incr-file-reader");
		let mut writer = IncrementalFileWriter::new(&dir.0, "data", 12).unwrap();
		writer.append_record(&header(3), &[1, 2, 3]).unwrap();
		writer.append_record(&header(2), &[4, 5]).unwrap();
		let mut reader = IncrementalFileReader::new(&dir.0, "data");
		let first = reader.next_record().unwrap().unwrap();
		assert_eq!(first.header.data_size, 3);
		let second = reader.next_record().unwrap().unwrap();
		assert_eq!(second.header.data_size, 2);
		assert_ne!(first.path, second.path);
		assert!(reader.next_record().unwrap().is_none());
	}
}
