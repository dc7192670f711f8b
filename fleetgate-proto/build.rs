fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/management.proto");
    println!("cargo:rerun-if-changed=proto/bootstrap.proto");

    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR")?);

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .file_descriptor_set_path(out_dir.join("fleetgate_descriptor.bin"))
        .compile_protos(
            &["proto/management.proto", "proto/bootstrap.proto"],
            &["proto"],
        )?;

    Ok(())
}
