fn main() {
	tonic_build::compile_protos("proto/ferrite.proto").expect("compile protos");
}
