//! Compiles the gRPC wire definitions for the volume daemon and the
//! node storage agent.
//!
//! Uses `tonic-build` with a vendored `protoc` so builds do not depend on a
//! host protobuf compiler. Generated code is placed in `OUT_DIR` and pulled
//! in via `tonic::include_proto!` in `src/proto.rs`.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/lvmd.proto", "proto/csi.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/lvmd.proto");
    println!("cargo:rerun-if-changed=proto/csi.proto");

    Ok(())
}
