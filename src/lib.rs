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

//! A lock-free, append-only storage substrate: bucketed `MonoLog`s,
//! atomically swappable encoded pointers, a choice of concurrency-control
//! tail, an incremental archival pipeline, and a radix-tree-backed index
//! of record offsets. This crate builds the mechanism; interpreting record
//! bytes as typed rows, compiling predicates, or serving requests over the
//! network are all concerns of a collaborator built on top of it.

pub mod archival;
pub mod concurrency;
pub mod config;
pub mod display;
pub mod error;
pub mod index;
pub mod monolog;
pub mod record_log;
pub mod storage;

pub use concurrency::{ConcurrencyControl, ObjectState, ObjectStateValue, ReadStalledTail, WriteStalledTail};
pub use config::StorageOptions;
pub use error::{Error, Result};
pub use index::{Filter, RadixTree, Reflog};
pub use monolog::{exp2_linear::Exp2LinearMonoLog, linear::LinearMonoLog, MonoLog};
pub use record_log::Log;
pub use storage::{AuxBlock, Block, PtrMetadata, ReadOnlyPtr, StorageAllocator, SwappablePtr};
