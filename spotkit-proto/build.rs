//! Build script for regenerating Rust code from protobuf definitions.
//!
//! The generated sources are checked in under `src/generated`, so protoc is
//! only needed when the `codegen` feature is enabled.

use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=build.rs");

    if std::env::var_os("CARGO_FEATURE_CODEGEN").is_none() {
        return Ok(());
    }

    let out_dir = PathBuf::from("src/generated");
    std::fs::create_dir_all(&out_dir)?;

    let proto_files = vec![
        PathBuf::from("proto/header.proto"),
        PathBuf::from("proto/data_chunk.proto"),
        PathBuf::from("proto/lease.proto"),
    ];

    let existing_protos: Vec<PathBuf> = proto_files
        .into_iter()
        .filter(|p| {
            if p.exists() {
                println!("cargo:rerun-if-changed={}", p.display());
                true
            } else {
                println!("cargo:warning=Proto file not found: {:?}", p);
                false
            }
        })
        .collect();

    if existing_protos.is_empty() {
        println!("cargo:warning=No proto files found");
        return Ok(());
    }

    // Messages only; services are generated by each per-service crate.
    tonic_build::configure()
        .build_server(false)
        .build_client(false)
        .bytes(["."])
        .out_dir(&out_dir)
        .compile(&existing_protos, &[PathBuf::from("proto")])?;

    Ok(())
}
