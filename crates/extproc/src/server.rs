//! Binds the generated tonic `ExternalProcessor` service to the phase
//! dispatcher. One `CallContext` is created per accepted stream and lives
//! only as long as the spawned task driving it — mirrors `MyEP::process` in
//! curiefense's external-processing server, adapted to stream phase
//! messages through [`dispatcher::drive_one`] instead of a hand-rolled
//! request/body state machine.

use std::sync::Arc;

use protos::ext_proc::external_processor_server::ExternalProcessor;
use protos::ext_proc::processing_response::Response as PhaseResponseKind;
use protos::ext_proc::{ProcessingRequest, ProcessingResponse};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use crate::dispatcher::{self, CallContext, Processor};

/// One in-flight response per phase message is the common case; a handful
/// of slack so the dispatcher task never blocks on a slow reader.
const RESPONSE_CHANNEL_CAPACITY: usize = 16;

pub struct ExtProcService<P: ?Sized> {
	processor: Arc<P>,
}

impl<P: Processor + ?Sized> ExtProcService<P> {
	pub fn new(processor: Arc<P>) -> Self {
		Self { processor }
	}
}

#[tonic::async_trait]
impl<P: Processor + ?Sized> ExternalProcessor for ExtProcService<P> {
	type ProcessStream = ReceiverStream<Result<ProcessingResponse, Status>>;

	async fn process(
		&self,
		request: Request<Streaming<ProcessingRequest>>,
	) -> Result<Response<Self::ProcessStream>, Status> {
		let mut incoming = request.into_inner();
		let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
		let processor = self.processor.clone();

		tokio::spawn(async move {
			let mut ctx = CallContext::default();
			loop {
				let message = match incoming.message().await {
					Ok(Some(message)) => message,
					Ok(None) => break,
					Err(status) => {
						tracing::debug!(error = %status, "ext_proc stream closed with an error");
						break;
					},
				};

				let response = dispatcher::drive_one(processor.as_ref(), message, &mut ctx).await;
				let is_final = matches!(response.response, Some(PhaseResponseKind::ImmediateResponse(_)));

				// The data plane may have cancelled the stream; stop driving it
				// rather than keep computing responses nobody will read.
				if tx.send(Ok(response)).await.is_err() {
					break;
				}
				if is_final {
					break;
				}
			}
		});

		Ok(Response::new(ReceiverStream::new(rx)))
	}
}
