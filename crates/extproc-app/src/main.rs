//! CLI entry point. Parses `run -s/--service <ProcessorName>`, builds that
//! processor's out-of-band clients, and serves the ext_proc gRPC contract
//! until SIGINT closes the server, draining in-flight streams.

use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use extproc::config::Config;
use extproc::server::ExtProcService;
use extproc::service::{self, ServiceName};
use extproc_core::prelude::*;
use protos::ext_proc::external_processor_server::ExternalProcessorServer;
use tonic::transport::Server;

#[derive(Parser, Debug)]
#[command(name = "extproc", about = "External Processor for the gateway's ext_proc filter")]
struct Cli {
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run the gRPC server (the only supported sub-command).
	Run {
		/// Processor to run for the lifetime of this process.
		#[arg(short = 's', long = "service", default_value = "BaseExternalProcessorService")]
		service: String,
	},
}

fn main() -> anyhow::Result<()> {
	let cfg = Config::from_env();
	let subscriber =
		extproc_core::telemetry::get_subscriber("extproc".into(), cfg.log_level.clone(), std::io::stdout);
	extproc_core::telemetry::init_subscriber(subscriber);

	let cli = Cli::parse();
	let Command::Run { service } = cli.command;
	let service_name: ServiceName = service.parse()?;

	let result = tokio::runtime::Builder::new_multi_thread()
		.worker_threads(cfg.grpc_workers.max(1))
		.enable_all()
		.build()?
		.block_on(serve(service_name, cfg));

	extproc_core::telemetry::flush_logs();
	result
}

async fn serve(service_name: ServiceName, cfg: Config) -> anyhow::Result<()> {
	info!(service = %service_name, port = cfg.grpc_port, "starting ext_proc server");

	let processor = service::build(service_name, &cfg).await?;
	let addr: SocketAddr = format!("[::]:{}", cfg.grpc_port).parse()?;

	Server::builder()
		.add_service(ExternalProcessorServer::new(ExtProcService::new(processor)))
		.serve_with_shutdown(addr, async {
			let _ = tokio::signal::ctrl_c().await;
			info!("received interrupt, draining in-flight streams");
		})
		.await?;

	Ok(())
}
