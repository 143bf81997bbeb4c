fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Provisioner and snapshot plugin services exposed to the external controller
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["../proto/provisioner.proto"], &["../proto"])?;

    Ok(())
}
