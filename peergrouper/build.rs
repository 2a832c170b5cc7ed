use anyhow::{Context, Result};

fn main() -> Result<()> {
    // Build the replicaset.proto code.
    tonic_build::configure()
        .out_dir("src/grpc")
        .build_client(true)
        .build_server(false)
        .compile(&["proto/replicaset.proto"], &["proto"])
        .context("error compiling replicaset proto")?;

    Ok(())
}
