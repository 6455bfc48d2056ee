const PROTO: &str = "proto/gtfs-realtime.proto";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed={PROTO}");

    let protoc_path = protoc_bin_vendored::protoc_bin_path()?;
    unsafe {
        std::env::set_var("PROTOC", protoc_path);
    }

    prost_build::Config::new()
        .type_attribute(".", "#[allow(clippy::derive_partial_eq_without_eq)]")
        .compile_protos(&[PROTO], &["proto/"])?;

    Ok(())
}
