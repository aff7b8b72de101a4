use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ferrite_queue::jobs::RetryPolicy;
use ferrite_queue::{ServiceConfig, WorkQueueService};
use log::{debug, info};
use tempfile::tempdir;

const Q1: &str = "1";

fn main() {
	env_logger::init();

	info!("Threaded Stress Example");

	let producers_num: u32 = 4;
	let workers_num: u32 = 8;
	let jobs_num: u32 = 10_000;

	let total_jobs = producers_num * jobs_num;
	let burndown = Arc::new(AtomicU32::new(total_jobs));

	let tmp_dir = tempdir().unwrap();
	let service = WorkQueueService::open(ServiceConfig {
		data_dir: tmp_dir.path().to_path_buf(),
		fsync: false,
		..ServiceConfig::default()
	})
	.unwrap();

	info!("producers={} consumers={} jobs={}", producers_num, workers_num, total_jobs);

	let now = Instant::now();

	let mut handles = Vec::new();

	for p in 1..=producers_num {
		let wk = service.queue();
		handles.push(std::thread::spawn(move || {
			for n in 1..=jobs_num {
				let payload = format!(r#"{{"producer": {}, "num": {}}}"#, p, n);
				let priority = (n % 10) as u8;
				assert!(wk
					.enqueue(Q1, payload.into(), Default::default(), priority, 0, RetryPolicy::default(), "")
					.is_ok());
			}
		}));
	}

	for i in 1..=workers_num {
		let wk = service.queue();
		let burndown = burndown.clone();
		handles.push(std::thread::spawn(move || loop {
			if burndown.load(Ordering::Relaxed) == 0 {
				break;
			}
			match wk.lease(Q1, 16, 30_000) {
				Ok(jobs) if !jobs.is_empty() => {
					for job in jobs {
						// Completes the job
						assert!(wk.ack(&job.id, &job.lease_token).is_ok());
						// Updates the work burndown counter
						let remaining = burndown.fetch_sub(1, Ordering::Relaxed);
						debug!("Worker {} - Completed {} [{}]", i, job.id, remaining);
					}
				},
				// Empty or not yet created; give the producers a chance
				_ => std::thread::yield_now(),
			}
		}));
	}

	for handle in handles {
		handle.join().unwrap();
	}

	let elapsed = now.elapsed();
	info!("{}s {}ms", elapsed.as_secs(), elapsed.as_millis());
}
