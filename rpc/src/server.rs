//! # Ferrite gRPC Server
//!
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueHint};
use ferrite_queue::{ServiceConfig, WorkQueueService};
use log::info;
use tonic::transport::Server;

mod protocol;
use crate::protocol::ferrite_rpc::queue_server::QueueServer;
use crate::protocol::QueueRpc;

#[derive(Parser)]
#[command(name = "Ferrite RPC Server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ferrite RPC Work Queue Server", long_about = None)]
#[command(next_line_help = true)]
struct Cli {
	/// Directory for the queue data (write-ahead log and index)
	#[arg(short, long, default_value = "./_data", value_name = "DIR", value_hint = ValueHint::DirPath)]
	data: PathBuf,

	/// Socket address to listen
	#[arg(short, long, default_value = "[::1]:50051", value_name = "IP:PORT")]
	addr: SocketAddr,

	/// Segment size in bytes before the write-ahead log rotates
	#[arg(long, default_value_t = ferrite_queue::segment::DEFAULT_SEGMENT_SIZE, value_name = "BYTES")]
	segment_size: u64,

	/// Skip the disk sync on every append (faster, weaker durability)
	#[arg(long)]
	no_fsync: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	env_logger::init();

	let cli = Cli::parse();

	info!("gRPC server listening on {}", cli.addr);

	let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
	health_reporter.set_serving::<QueueServer<QueueRpc>>().await;

	let queue_service = WorkQueueService::open(ServiceConfig {
		data_dir: cli.data,
		segment_size: cli.segment_size,
		fsync: !cli.no_fsync,
		..ServiceConfig::default()
	})?;
	let rpc = QueueRpc::new(queue_service);

	Server::builder()
		.add_service(health_service)
		.add_service(QueueServer::new(rpc))
		.serve(cli.addr)
		.await?;

	Ok(())
}
