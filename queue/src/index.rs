//! RocksDB-backed key-value index.
//!
//! The index is authoritative only for idempotency keys; queue state is
//! authoritative in memory and rebuilt from the write-ahead log. Job
//! metadata checkpoints are best-effort bookkeeping for the admin surface.
use std::path::Path;

use log::info;
use rocksdb::{IteratorMode, Options, WriteOptions, DB};

use crate::error::{QError, QResult};
use crate::jobs::Job;

const IDEMPOTENCY_PREFIX: &str = "i:";
const JOB_PREFIX: &str = "j:";

impl From<rocksdb::Error> for QError {
	fn from(error: rocksdb::Error) -> Self {
		QError::StoreError(error.into_string())
	}
}

/// Small persistent ordered map for idempotency keys and job metadata.
pub struct RocksIndex {
	db: DB,
	sync_writes: bool,
}

impl RocksIndex {
	/// Opens the index, creating the database if missing.
	///
	/// `sync_writes` should match the WAL's sync policy so both layers give
	/// the same durability answer.
	pub fn open(path: &Path, sync_writes: bool) -> QResult<Self> {
		let mut opts = Options::default();
		opts.create_if_missing(true);
		opts.increase_parallelism(std::thread::available_parallelism().unwrap().get() as i32);

		let db = DB::open(&opts, path)?;

		info!("Index: open in {}", path.display());

		Ok(Self { db, sync_writes })
	}

	fn writeopts(&self) -> WriteOptions {
		let mut opts = WriteOptions::default();
		opts.set_sync(self.sync_writes);
		opts
	}

	pub fn put(&self, key: &[u8], value: &[u8]) -> QResult<()> {
		self.db.put_opt(key, value, &self.writeopts())?;

		Ok(())
	}

	pub fn get(&self, key: &[u8]) -> QResult<Option<Vec<u8>>> {
		Ok(self.db.get(key)?)
	}

	pub fn delete(&self, key: &[u8]) -> QResult<()> {
		self.db.delete_opt(key, &self.writeopts())?;

		Ok(())
	}

	/// Returns all entries whose key starts with `prefix`, in key order.
	pub fn scan(&self, prefix: &[u8]) -> QResult<Vec<(Vec<u8>, Vec<u8>)>> {
		let mut entries = Vec::new();
		let iter = self
			.db
			.iterator(IteratorMode::From(prefix, rocksdb::Direction::Forward));

		for item in iter {
			let (key, value) = item?;
			if !key.starts_with(prefix) {
				break;
			}
			entries.push((key.to_vec(), value.to_vec()));
		}

		Ok(entries)
	}

	/// Records the job admitted under an external idempotency key.
	pub fn set_idempotency_key(&self, key: &str, job_id: &str) -> QResult<()> {
		self.put(format!("{}{}", IDEMPOTENCY_PREFIX, key).as_bytes(), job_id.as_bytes())
	}

	/// Returns the job id previously admitted under `key`, if any.
	pub fn get_idempotency_key(&self, key: &str) -> QResult<Option<String>> {
		match self.get(format!("{}{}", IDEMPOTENCY_PREFIX, key).as_bytes())? {
			Some(bytes) => Ok(Some(String::from_utf8(bytes).map_err(|_| {
				QError::StoreError("non-utf8 idempotency value".into())
			})?)),
			None => Ok(None),
		}
	}

	pub fn put_job(&self, job: &Job) -> QResult<()> {
		let bytes = bincode::serialize(job).expect("serialize job");
		self.put(format!("{}{}", JOB_PREFIX, job.id).as_bytes(), &bytes)
	}

	pub fn get_job(&self, job_id: &str) -> QResult<Option<Job>> {
		match self.get(format!("{}{}", JOB_PREFIX, job_id).as_bytes())? {
			Some(bytes) => bincode::deserialize(&bytes)
				.map(Some)
				.map_err(|error| QError::StoreError(error.to_string())),
			None => Ok(None),
		}
	}

	pub fn delete_job(&self, job_id: &str) -> QResult<()> {
		self.delete(format!("{}{}", JOB_PREFIX, job_id).as_bytes())
	}
}
