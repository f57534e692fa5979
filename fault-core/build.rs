fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=../proto/faultline.proto");
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile(&["../proto/faultline.proto"], &["../proto"])?;
    Ok(())
}
