//! Generated bindings for the ext_proc external processor gRPC contract.

pub mod ext_proc {
	tonic::include_proto!("envoy.service.ext_proc.v3");
}
