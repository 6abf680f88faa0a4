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

use std::fmt;

#[derive(Debug)]
pub enum Error {
	OutOfMemory,
	Io(std::io::Error),
	InvalidState(String),
	CorruptArchive(String),
	StaleUpdate,
	OutOfBounds,
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Error::OutOfMemory => write!(f, "Out of memory"),
			Error::Io(e) => write!(f, "IO error: {}", e),
			Error::InvalidState(s) => write!(f, "Invalid state: {}", s),
			Error::CorruptArchive(s) => write!(f, "Corrupt archive: {}", s),
			Error::StaleUpdate => write!(f, "Stale update"),
			Error::OutOfBounds => write!(f, "Index out of bounds"),
		}
	}
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
	fn from(e: std::io::Error) -> Error {
		Error::Io(e)
	}
}
