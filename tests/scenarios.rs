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

//! Cross-module scenarios: these exercise the record log, the archival
//! pipeline, and the radix index together, so they live here rather than
//! in any single module's unit tests.

use std::sync::Arc;
use std::thread;

use confluo_storage::archival::{ActionLog, Archiver, Loader};
use confluo_storage::concurrency::{ConcurrencyControl, ReadStalledTail, WriteStalledTail};
use confluo_storage::monolog::linear::LinearMonoLog;
use confluo_storage::monolog::MonoLog;
use confluo_storage::{Log, RadixTree, Reflog};

struct TempDir(std::path::PathBuf);

impl TempDir {
	fn new(name: &str) -> TempDir {
		let mut dir = std::env::temp_dir();
		dir.push(format!("confluo-storage-scenario-{}-{}", name, std::process::id()));
		std::fs::create_dir_all(&dir).unwrap();
		TempDir(dir)
	}
}

impl Drop for TempDir {
	fn drop(&mut self) {
		let _ = std::fs::remove_dir_all(&self.0);
	}
}

#[test]
fn pushed_values_are_readable_back_in_order() {
	let _ = env_logger::try_init();
	let log: Log<u64, WriteStalledTail> = Log::new();
	for i in 0..1000u64 {
		let pos = log.append_object(i).unwrap();
		assert_eq!(pos as u64, i);
	}
	assert_eq!(log.size(), 1000);
	for i in 0..1000u64 {
		assert_eq!(log.get(i as usize).unwrap(), i);
	}
}

#[test]
fn a_bulk_write_spanning_many_buckets_reads_back_identical() {
	type SmallLog = LinearMonoLog<u8, 64, 80>;
	let log = SmallLog::new();
	let data: Vec<u8> = (0..4096u32).map(|i| (i % 256) as u8).collect();
	log.write(0, &data);
	let mut out = vec![0u8; data.len()];
	log.read(0, &mut out).unwrap();
	assert_eq!(out, data);
}

#[test]
fn four_concurrent_appenders_produce_a_permutation_of_the_full_range() {
	let log: Arc<Log<u64, ReadStalledTail>> = Arc::new(Log::new());
	let handles: Vec<_> = (0..4u64)
		.map(|t| {
			let log = log.clone();
			thread::spawn(move || {
				let mut positions = Vec::new();
				for i in 0..250_000u64 {
					positions.push(log.append_object(t * 1_000_000 + i).unwrap());
				}
				positions
			})
		})
		.collect();
	let mut all_positions: Vec<usize> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
	all_positions.sort_unstable();
	let expected: Vec<usize> = (0..1_000_000).collect();
	assert_eq!(all_positions, expected);
}

#[test]
fn archiving_a_full_bucket_preserves_values_and_flips_it_out_of_memory() {
	let dir = TempDir::new("archive-visibility");
	type SmallLog = LinearMonoLog<u64, 1024, 8>;
	let log = SmallLog::new();
	let data: Vec<u64> = (0..1024u64).collect();
	log.write(0, &data);

	let mut archiver = Archiver::new(&dir.0, "data", 1 << 20, confluo_storage::storage::Encoding::Identity).unwrap();
	let archived = archiver.archive_monolog_bucket(&log, 0, 0, 1024).unwrap();
	assert!(archived);

	for i in 0..1024usize {
		assert_eq!(log.get(i).unwrap(), i as u64);
	}
	let ptr = log.bucket_ptr(0).unwrap();
	assert!(!ptr.block().is_in_memory());
}

#[test]
fn randomized_payloads_of_varying_length_round_trip_through_append_and_read() {
	use rand::Rng;
	let log: Log<u8, ReadStalledTail> = Log::new();
	let mut rng = rand::thread_rng();
	let mut positions = Vec::new();
	for _ in 0..200 {
		let len = rng.gen_range(1..64);
		let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
		let pos = log.append(&payload).unwrap();
		positions.push((pos, payload));
	}
	for (pos, payload) in positions {
		let mut out = vec![0u8; payload.len()];
		log.read(pos, &mut out).unwrap();
		assert_eq!(out, payload);
	}
}

#[test]
fn write_stalled_tail_only_advances_once_the_earlier_writer_completes() {
	let cc = Arc::new(WriteStalledTail::new());
	let cc_a = cc.clone();
	let a_started = Arc::new(std::sync::Barrier::new(2));
	let a_started_writer = a_started.clone();
	let a_tail = Arc::new(std::sync::Mutex::new(None));
	let a_tail_writer = a_tail.clone();
	let a = thread::spawn(move || {
		let tail = cc_a.start_write_op();
		*a_tail_writer.lock().unwrap() = Some(tail);
		a_started_writer.wait();
		thread::sleep(std::time::Duration::from_millis(20));
		cc_a.end_write_op(tail);
	});

	a_started.wait();
	let tail_b = cc.start_write_op();
	cc.end_write_op(tail_b);
	// B finished immediately, but A (which started first) has not, so the
	// read tail must still reflect only A's not-yet-completed write.
	assert_eq!(cc.get_tail(), 0);
	a.join().unwrap();
	assert_eq!(cc.get_tail(), 2);
}

#[test]
fn repeated_lookups_of_an_inserted_key_are_stable_and_ordered() {
	let tree: RadixTree<Reflog, 8> = RadixTree::new(4);
	let key = 7u32.to_be_bytes();
	tree.get_or_create(&key).push_back(42);
	tree.get_or_create(&key).push_back(100);

	let reflog = tree.lookup(&key).unwrap();
	assert_eq!(reflog.get(0).unwrap(), 42);
	assert_eq!(reflog.get(1).unwrap(), 100);
	// a second lookup resolves to the same leaf and sees the same entries.
	let reflog_again = tree.lookup(&key).unwrap();
	assert_eq!(reflog_again.get(0).unwrap(), 42);
	assert_eq!(reflog_again.get(1).unwrap(), 100);

	let found = tree.range_lookup(&5u32.to_be_bytes(), &10u32.to_be_bytes());
	assert_eq!(found.len(), 1);
	assert_eq!(found[0].1.get(0).unwrap(), 42);
	assert_eq!(found[0].1.get(1).unwrap(), 100);
}

#[test]
fn reload_after_a_simulated_crash_recovers_every_value_up_to_the_archived_prefix() {
	let dir = TempDir::new("archive-reload");
	type SmallLog = LinearMonoLog<u64, 1024, 16>;
	let log = SmallLog::new();
	let data: Vec<u64> = (0..10_000u64).collect();
	log.write(0, &data);

	{
		let mut archiver = Archiver::new(&dir.0, "data", 1 << 20, confluo_storage::storage::Encoding::Identity).unwrap();
		for bucket_idx in 0..8usize {
			let tail = ((bucket_idx + 1) * 1024) as u64;
			archiver.archive_monolog_bucket(&log, bucket_idx * 1024, bucket_idx, tail).unwrap();
		}
	}

	// Simulate a crash: reopen the transaction log and replay it exactly as
	// a fresh process would on startup.
	let actions = Loader::recover_transaction_log(dir.0.join("data_transaction_log.dat")).unwrap();
	assert_eq!(actions.len(), 8);

	let reloaded: SmallLog = SmallLog::new();
	// Only the unarchived tail is replayed here, by the owning collaborator;
	// the archived prefix's buckets must still be uninitialized so the
	// reattach below installs into them rather than finding them occupied.
	let tail_start = 8 * 1024;
	reloaded.write(tail_start, &data[tail_start..]);
	let reattached = Loader::reload_monolog(&dir.0, "data", &actions, &reloaded, 1024).unwrap();
	assert_eq!(reattached, 8);

	for i in 0..10_000usize {
		assert_eq!(reloaded.get(i).unwrap(), i as u64);
	}
}

#[test]
fn a_torn_commit_is_truncated_and_the_archived_prefix_stops_at_the_last_commit() {
	let dir = TempDir::new("crash-mid-commit");
	let path = dir.0.join("data_transaction_log.dat");
	{
		let mut log = ActionLog::open(&path).unwrap();
		log.commit(&confluo_storage::archival::ArchivalAction::MonologLinear { tail: 1024 }).unwrap();
	}
	let committed_len = std::fs::metadata(&path).unwrap().len();
	{
		use std::io::Write;
		// Simulate a crash that left a partially-written second action.
		let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
		file.write_all(&[0xAB; 5]).unwrap();
	}
	let actions = Loader::recover_transaction_log(&path).unwrap();
	assert_eq!(actions, vec![confluo_storage::archival::ArchivalAction::MonologLinear { tail: 1024 }]);
	assert_eq!(std::fs::metadata(&path).unwrap().len(), committed_len);
}
