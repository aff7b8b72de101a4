use ferrite_queue::jobs::RetryPolicy;
use ferrite_queue::{ServiceConfig, WorkQueueService};
use tempfile::tempdir;

/// Dummy example.
fn main() {
	let tmp_dir = tempdir().unwrap();
	let service = WorkQueueService::open(ServiceConfig {
		data_dir: tmp_dir.path().to_path_buf(),
		fsync: false,
		..ServiceConfig::default()
	})
	.unwrap();
	let work_queue = service.queue();

	// Producer
	let id = work_queue
		.enqueue("q1", "hello".into(), Default::default(), 5, 0, RetryPolicy::default(), "")
		.unwrap();

	// Consumer
	match work_queue.lease("q1", 1, 30_000) {
		Ok(jobs) => {
			assert_eq!(jobs[0].id, id);
			work_queue.ack(&jobs[0].id, &jobs[0].lease_token).unwrap();
		},
		_ => panic!(),
	}
}
