//! Build script for relaylink
//!
//! Compiles the Linkage protobuf schema into tonic client/server code.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=proto/linkage.proto");

    if let Err(e) = tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/linkage.proto"], &["proto"])
    {
        panic!("failed to compile linkage.proto: {e}");
    }
}
