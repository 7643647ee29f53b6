fn main() -> anyhow::Result<()> {
	let proto_file = "proto/envoy/service/ext_proc/v3/external_processor.proto";
	println!("cargo:rerun-if-changed={proto_file}");

	let file_descriptors = protox::compile([proto_file], ["proto"])?;
	tonic_prost_build::configure()
		.build_server(true)
		.build_client(true)
		.compile_fds(file_descriptors)?;
	Ok(())
}
