fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_files = &["../protos/energy_sensor.proto"];
    let include_dirs = &["../protos"];

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        // AlertPayload travels as JSON over HTTP, and the summary is logged
        // as JSON, so every message gets serde derives.
        .type_attribute(".", "#[derive(serde::Serialize, serde::Deserialize)]")
        .compile_protos(proto_files, include_dirs)?;

    for file in proto_files {
        println!("cargo:rerun-if-changed={file}");
    }

    Ok(())
}
