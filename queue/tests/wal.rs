use std::collections::{HashMap, HashSet};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use ferrite_queue::error::QError;
use ferrite_queue::record::{Record, RecordType};
use ferrite_queue::wal::{Wal, WalConfig};
use tempfile::tempdir;

#[test]
fn record_round_trip() {
	let mut headers = HashMap::new();
	headers.insert("foo".to_string(), "bar".to_string());
	headers.insert("baz".to_string(), "qux".to_string());

	let rec = Record {
		record_type: RecordType::Enqueue,
		queue: "test-queue".into(),
		job_id: "job-123".into(),
		priority: 7,
		attempts: 2,
		max_attempts: 5,
		scheduled_ms: 1_700_000_000_123,
		payload: "test payload".into(),
		headers,
		lease_token: "lease-456".into(),
		reason: "test reason".into(),
	};

	let decoded = Record::decode(&rec.encode()).unwrap();
	assert_eq!(decoded, rec);
}

#[test]
fn record_round_trip_empty_fields() {
	let rec = Record {
		record_type: RecordType::Ack,
		queue: "q".into(),
		job_id: "j".into(),
		..Default::default()
	};

	let decoded = Record::decode(&rec.encode()).unwrap();
	assert_eq!(decoded, rec);
}

#[test]
fn record_rejects_truncation() {
	let rec = Record {
		record_type: RecordType::Enqueue,
		queue: "q".into(),
		job_id: "j".into(),
		payload: "payload".into(),
		..Default::default()
	};
	let bytes = rec.encode();

	for len in 0..bytes.len() {
		assert!(
			matches!(Record::decode(&bytes[..len]), Err(QError::InvalidRecord(_))),
			"decode of {} bytes should fail",
			len
		);
	}
}

#[test]
fn record_rejects_unknown_type() {
	let rec = Record { queue: "q".into(), job_id: "j".into(), ..Default::default() };
	let mut bytes = rec.encode().to_vec();
	bytes[0] = 99;

	assert!(matches!(Record::decode(&bytes), Err(QError::InvalidRecord(_))));
}

#[test]
fn write_and_replay() {
	let tmp_dir = tempdir().unwrap();

	let records = vec![
		Record {
			record_type: RecordType::Enqueue,
			queue: "test".into(),
			job_id: "job1".into(),
			priority: 5,
			payload: "payload1".into(),
			..Default::default()
		},
		Record {
			record_type: RecordType::Ack,
			queue: "test".into(),
			job_id: "job1".into(),
			lease_token: "lease1".into(),
			..Default::default()
		},
	];

	{
		let wal = wal_at(tmp_dir.path(), 1024);
		for rec in &records {
			wal.append(rec).unwrap();
		}
	}

	// Reopen and replay.
	let wal = wal_at(tmp_dir.path(), 1024);
	let replayed = replay_all(&wal);

	assert_eq!(replayed, records);
}

#[test]
fn segment_rotation() {
	let tmp_dir = tempdir().unwrap();
	let wal = wal_at(tmp_dir.path(), 100);

	for _ in 0..10 {
		let rec = Record {
			record_type: RecordType::Enqueue,
			queue: "test".into(),
			job_id: "job".into(),
			payload: vec![0u8; 50].into(),
			..Default::default()
		};
		wal.append(&rec).unwrap();
	}

	assert!(wal.segment_count() > 1);
	assert!(wal.total_size() > 0);

	// Rotation does not change replay order.
	let replayed = replay_all(&wal);
	assert_eq!(replayed.len(), 10);
}

#[test]
fn corrupted_tail_skips_to_next_segment() {
	let tmp_dir = tempdir().unwrap();

	// One record per segment: every append finds the active segment full.
	{
		let wal = wal_at(tmp_dir.path(), 1);
		for id in ["a", "b", "c"] {
			wal.append(&enqueue_record(id)).unwrap();
		}
		assert_eq!(wal.segment_count(), 3);
	}

	// Flip a byte in the body of the first segment's record.
	let first = tmp_dir.path().join("000000.wal");
	let mut file = std::fs::OpenOptions::new().write(true).open(&first).unwrap();
	file.seek(SeekFrom::Start(12)).unwrap();
	file.write_all(&[0xff]).unwrap();
	drop(file);

	let wal = wal_at(tmp_dir.path(), 1);
	let replayed = replay_all(&wal);

	let ids: Vec<&str> = replayed.iter().map(|rec| rec.job_id.as_str()).collect();
	assert_eq!(ids, vec!["b", "c"]);
}

#[test]
fn torn_tail_is_dropped() {
	let tmp_dir = tempdir().unwrap();

	{
		let wal = wal_at(tmp_dir.path(), 1024);
		wal.append(&enqueue_record("a")).unwrap();
		wal.append(&enqueue_record("b")).unwrap();
	}

	// Tear the last frame mid-write.
	let first = tmp_dir.path().join("000000.wal");
	let len = std::fs::metadata(&first).unwrap().len();
	let file = std::fs::OpenOptions::new().write(true).open(&first).unwrap();
	file.set_len(len - 3).unwrap();
	drop(file);

	let wal = wal_at(tmp_dir.path(), 1024);
	let replayed = replay_all(&wal);

	let ids: Vec<&str> = replayed.iter().map(|rec| rec.job_id.as_str()).collect();
	assert_eq!(ids, vec!["a"]);
}

#[test]
fn append_after_torn_tail_survives() {
	let tmp_dir = tempdir().unwrap();

	{
		let wal = wal_at(tmp_dir.path(), 1024);
		wal.append(&enqueue_record("a")).unwrap();
		wal.append(&enqueue_record("b")).unwrap();
	}

	let first = tmp_dir.path().join("000000.wal");
	let len = std::fs::metadata(&first).unwrap().len();
	let file = std::fs::OpenOptions::new().write(true).open(&first).unwrap();
	file.set_len(len - 3).unwrap();
	drop(file);

	// Reopening trims the torn tail, so the next append is replayable.
	{
		let wal = wal_at(tmp_dir.path(), 1024);
		wal.append(&enqueue_record("c")).unwrap();
	}

	let wal = wal_at(tmp_dir.path(), 1024);
	let ids: Vec<String> = replay_all(&wal).into_iter().map(|rec| rec.job_id).collect();
	assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
}

#[test]
fn callback_error_aborts_replay() {
	let tmp_dir = tempdir().unwrap();

	let wal = wal_at(tmp_dir.path(), 1024);
	wal.append(&enqueue_record("a")).unwrap();
	wal.append(&enqueue_record("b")).unwrap();

	let mut seen = 0;
	let result = wal.replay(|_| {
		seen += 1;
		Err(QError::StoreError("boom".into()))
	});

	assert_eq!(result, Err(QError::StoreError("boom".into())));
	assert_eq!(seen, 1);
}

#[test]
fn compaction_keeps_live_enqueues() {
	let tmp_dir = tempdir().unwrap();

	let wal = wal_at(tmp_dir.path(), 1);
	wal.append(&enqueue_record("a")).unwrap();
	wal.append(&enqueue_record("b")).unwrap();
	wal.append(&enqueue_record("c")).unwrap();
	wal.append(&Record {
		record_type: RecordType::Ack,
		queue: "test".into(),
		job_id: "b".into(),
		..Default::default()
	})
	.unwrap();
	assert_eq!(wal.segment_count(), 4);

	let live: HashSet<String> = ["a", "c"].iter().map(|id| id.to_string()).collect();
	wal.compact(&live).unwrap();

	// One compacted segment plus the untouched active one.
	assert_eq!(wal.segment_count(), 2);

	let replayed = replay_all(&wal);
	let summary: Vec<(RecordType, &str)> =
		replayed.iter().map(|rec| (rec.record_type, rec.job_id.as_str())).collect();
	assert_eq!(
		summary,
		vec![
			(RecordType::Enqueue, "a"),
			(RecordType::Enqueue, "c"),
			(RecordType::Ack, "b"),
		]
	);
}

#[test]
fn compaction_survives_reopen() {
	let tmp_dir = tempdir().unwrap();

	{
		let wal = wal_at(tmp_dir.path(), 1);
		for id in ["a", "b", "c"] {
			wal.append(&enqueue_record(id)).unwrap();
		}
		let live: HashSet<String> = [("a".to_string())].into_iter().collect();
		wal.compact(&live).unwrap();
	}

	let wal = wal_at(tmp_dir.path(), 1);
	let ids: Vec<String> = replay_all(&wal).into_iter().map(|rec| rec.job_id).collect();
	assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
}

#[test]
fn compaction_is_a_noop_with_one_segment() {
	let tmp_dir = tempdir().unwrap();

	let wal = wal_at(tmp_dir.path(), 1024);
	wal.append(&enqueue_record("a")).unwrap();

	wal.compact(&HashSet::new()).unwrap();

	assert_eq!(wal.segment_count(), 1);
	assert_eq!(replay_all(&wal).len(), 1);
}

fn enqueue_record(job_id: &str) -> Record {
	Record {
		record_type: RecordType::Enqueue,
		queue: "test".into(),
		job_id: job_id.into(),
		priority: 5,
		payload: "payload".into(),
		..Default::default()
	}
}

fn wal_at(dir: &Path, segment_size: u64) -> Wal {
	Wal::open(WalConfig { dir: dir.to_path_buf(), segment_size, fsync: false }).unwrap()
}

fn replay_all(wal: &Wal) -> Vec<Record> {
	let mut replayed = Vec::new();
	wal.replay(|rec| {
		replayed.push(rec);
		Ok(())
	})
	.unwrap();

	replayed
}
