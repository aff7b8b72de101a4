use std::collections::HashMap;

use criterion::{criterion_group, criterion_main, Criterion};
use ferrite_queue::jobs::RetryPolicy;
use ferrite_queue::{ServiceConfig, WorkQueueService};
use tempfile::tempdir;

const QN: &str = "abc";

fn bench_queue(c: &mut Criterion) {
	let tmp_dir = tempdir().unwrap();
	let service = WorkQueueService::open(ServiceConfig {
		data_dir: tmp_dir.path().to_path_buf(),
		fsync: false,
		..ServiceConfig::default()
	})
	.unwrap();
	let wk = service.queue();

	c.bench_function("queue enqueue", |b| {
		b.iter(|| {
			wk.enqueue(QN, "payload".into(), HashMap::new(), 5, 0, RetryPolicy::default(), "")
				.expect("enqueue")
		});
	});

	c.bench_function("queue peek", |b| {
		b.iter(|| assert!(wk.peek(QN).expect("peek").is_some()));
	});

	c.bench_function("queue lease + ack", |b| {
		b.iter(|| {
			for job in wk.lease(QN, 1, 30_000).expect("lease") {
				wk.ack(&job.id, &job.lease_token).expect("ack");
			}
		});
	});
}

criterion_group!(benches, bench_queue);
criterion_main!(benches);
