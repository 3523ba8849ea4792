// Compiles the scanner RPC surface from proto/scanner.proto.
fn main() -> Result<(), anyhow::Error> {
	let proto_file = std::env::current_dir()?.join("proto/scanner.proto");
	let include_dir = std::env::current_dir()?.join("proto");

	tonic_build::configure()
		.build_server(true)
		.build_client(false)
		.compile_protos(&[proto_file.to_str().unwrap()], &[include_dir.to_str().unwrap()])?;

	println!("cargo:rerun-if-changed={}", proto_file.to_str().unwrap());
	Ok(())
}
