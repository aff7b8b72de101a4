//! gRPC server protocol implementation.
use ferrite_queue::error::QError;
use ferrite_queue::jobs::{LeasedJob, RetryPolicy};
use ferrite_queue::WorkQueueService;
use tonic::{Request, Response, Status};

use self::ferrite_rpc::queue_server::Queue;
use self::ferrite_rpc::{
	AckRequest, AckResponse, CompactRequest, CompactResponse, EnqueueRequest, EnqueueResponse,
	GetRateLimitRequest, GetRateLimitResponse, JobValue, LeaseRequest, LeaseResponse,
	ListQueuesRequest, ListQueuesResponse, NackRequest, NackResponse, RemoveDeadRequest,
	RemoveDeadResponse, SetRateLimitRequest, SetRateLimitResponse, StatsRequest, StatsResponse,
};

pub mod ferrite_rpc {
	tonic::include_proto!("ferrite.queue");
}

/// Converts a [LeasedJob] into a wire `JobValue`.
impl From<LeasedJob> for JobValue {
	fn from(job: LeasedJob) -> Self {
		Self {
			id: job.id,
			queue: job.queue,
			payload: job.payload.to_vec(),
			headers: job.headers,
			priority: job.priority as u32,
			attempts: job.attempts,
			lease_token: job.lease_token,
			lease_deadline_ms: job.lease_deadline_ms,
		}
	}
}

fn to_status(error: QError) -> Status {
	match &error {
		QError::RateLimited(_) => Status::resource_exhausted(error.to_string()),
		QError::NotFound(_) => Status::not_found(error.to_string()),
		QError::InvalidArgument(_) => Status::invalid_argument(error.to_string()),
		QError::NotInflight(_) | QError::BadLease(_) => {
			Status::failed_precondition(error.to_string())
		},
		_ => Status::internal(error.to_string()),
	}
}

/// Implements the gRPC service `Queue` for handling queue operations.
pub struct QueueRpc {
	queue_service: WorkQueueService,
}

impl QueueRpc {
	pub fn new(queue_service: WorkQueueService) -> Self {
		Self { queue_service }
	}
}

#[tonic::async_trait]
impl Queue for QueueRpc {
	/// Handles the gRPC `enqueue` method for admitting a job.
	async fn enqueue(
		&self,
		request: Request<EnqueueRequest>,
	) -> Result<Response<EnqueueResponse>, Status> {
		let body = request.into_inner();
		let queue = self.queue_service.queue();

		let priority = u8::try_from(body.priority).unwrap_or(u8::MAX);
		let retry = RetryPolicy { max_attempts: body.max_attempts };

		match queue.enqueue(
			&body.queue,
			body.payload.into(),
			body.headers,
			priority,
			body.delay_ms,
			retry,
			&body.idempotency_key,
		) {
			Ok(job_id) => Ok(Response::new(EnqueueResponse { job_id })),
			Err(error) => Err(to_status(error)),
		}
	}

	/// Handles the gRPC `lease` method for leasing deliverable jobs.
	async fn lease(
		&self,
		request: Request<LeaseRequest>,
	) -> Result<Response<LeaseResponse>, Status> {
		let body = request.into_inner();
		let queue = self.queue_service.queue();

		match queue.lease(&body.queue, body.max_jobs as usize, body.visibility_ms) {
			Ok(jobs) => Ok(Response::new(LeaseResponse {
				jobs: jobs.into_iter().map(JobValue::from).collect(),
			})),
			Err(error) => Err(to_status(error)),
		}
	}

	async fn ack(&self, request: Request<AckRequest>) -> Result<Response<AckResponse>, Status> {
		let body = request.into_inner();
		let queue = self.queue_service.queue();

		match queue.ack(&body.job_id, &body.lease_token) {
			Ok(()) => Ok(Response::new(AckResponse {})),
			Err(error) => Err(to_status(error)),
		}
	}

	async fn nack(
		&self,
		request: Request<NackRequest>,
	) -> Result<Response<NackResponse>, Status> {
		let body = request.into_inner();
		let queue = self.queue_service.queue();

		match queue.nack(&body.job_id, &body.lease_token, &body.reason) {
			Ok(()) => Ok(Response::new(NackResponse {})),
			Err(error) => Err(to_status(error)),
		}
	}

	async fn stats(
		&self,
		request: Request<StatsRequest>,
	) -> Result<Response<StatsResponse>, Status> {
		let body = request.into_inner();
		let queue = self.queue_service.queue();

		match queue.stats(&body.queue) {
			Ok(stats) => Ok(Response::new(StatsResponse {
				ready: stats.ready as u64,
				in_flight: stats.in_flight as u64,
				dead: stats.dead as u64,
			})),
			Err(error) => Err(to_status(error)),
		}
	}

	async fn list_queues(
		&self,
		_request: Request<ListQueuesRequest>,
	) -> Result<Response<ListQueuesResponse>, Status> {
		let queue = self.queue_service.queue();

		Ok(Response::new(ListQueuesResponse { queues: queue.list_queues() }))
	}

	async fn set_rate_limit(
		&self,
		request: Request<SetRateLimitRequest>,
	) -> Result<Response<SetRateLimitResponse>, Status> {
		let body = request.into_inner();
		let queue = self.queue_service.queue();

		queue.set_rate_limit(&body.queue, body.capacity, body.refill_rate);

		Ok(Response::new(SetRateLimitResponse {}))
	}

	async fn get_rate_limit(
		&self,
		request: Request<GetRateLimitRequest>,
	) -> Result<Response<GetRateLimitResponse>, Status> {
		let body = request.into_inner();
		let queue = self.queue_service.queue();

		let response = match queue.get_rate_limit(&body.queue) {
			Some((capacity, refill_rate)) => {
				GetRateLimitResponse { limited: true, capacity, refill_rate }
			},
			None => GetRateLimitResponse { limited: false, capacity: 0.0, refill_rate: 0.0 },
		};

		Ok(Response::new(response))
	}

	/// Removes a dead-lettered job. Administrative.
	async fn remove_dead(
		&self,
		request: Request<RemoveDeadRequest>,
	) -> Result<Response<RemoveDeadResponse>, Status> {
		let body = request.into_inner();
		let queue = self.queue_service.queue();

		match queue.remove_dead(&body.queue, &body.job_id) {
			Ok(()) => Ok(Response::new(RemoveDeadResponse {})),
			Err(error) => Err(to_status(error)),
		}
	}

	/// Folds WAL history down to the live job set. Administrative.
	async fn compact(
		&self,
		_request: Request<CompactRequest>,
	) -> Result<Response<CompactResponse>, Status> {
		let queue = self.queue_service.queue();

		match queue.compact() {
			Ok(()) => Ok(Response::new(CompactResponse {
				segments: queue.wal_segment_count() as u64,
				total_bytes: queue.wal_total_size(),
			})),
			Err(error) => Err(to_status(error)),
		}
	}
}
