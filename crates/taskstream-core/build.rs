/// Builds the gRPC client and server code for `proto/submitter.proto` using
/// `tonic-prost-build`.
///
/// # Byte Field Optimization
///
/// `DataChunk.data` is marked with `.bytes(...)` so fragments decode into
/// [`bytes::Bytes`] rather than `Vec<u8>`. Payload fragments produced by the
/// chunker are slices of the caller's buffer, and result fragments are
/// appended straight into the decoder's accumulator, so neither side copies
/// through an intermediate vector.
///
/// # Output
///
/// The generated module is exposed as `taskstream_core::proto`, together with
/// the encoded file descriptor set used by the server's reflection service.
///
/// # Panics
///
/// Panics if code generation fails.
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("taskstream_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();

    config
        .bytes([".taskstream.DataChunk.data"])
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/submitter.proto"], &["proto"])
        .unwrap();
}
