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

//! Incremental migration of log buckets from in-memory to file-backed,
//! mmap'd archived storage, with a crash-safe transaction log recording
//! every committed step.

pub mod action_log;
pub mod archiver;
pub mod incremental_file;
pub mod load;

pub use action_log::{ActionLog, ArchivalAction};
pub use archiver::Archiver;
pub use incremental_file::{map_region, IncrementalFileWriter};
pub use load::Loader;
