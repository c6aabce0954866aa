// demos/oneshot.rs
// Run with: SCP_HOST=10.0.0.5:22 SCP_USER=me cargo run --example oneshot
//
// SCP_PASSWORD logs in with a password (through the native backend),
// SCP_KEY points at a private key; without either the ssh agent is used.
// SCP_CONFIG may name a JSON connection config instead of the variables.

use anyhow::Context;
use rusty_scp::{ConnectionConfig, Credential};

fn load_config() -> anyhow::Result<ConnectionConfig> {
    if let Ok(path) = std::env::var("SCP_CONFIG") {
        return ConnectionConfig::from_json_file(&path)
            .with_context(|| format!("failed to load {path}"));
    }
    let host = std::env::var("SCP_HOST").context("SCP_HOST is not set")?;
    let user = std::env::var("SCP_USER").context("SCP_USER is not set")?;
    let credential = match (std::env::var("SCP_PASSWORD"), std::env::var("SCP_KEY")) {
        (Ok(password), _) => Credential::password(password),
        (_, Ok(path)) => Credential::key_file(path),
        _ => Credential::Agent,
    };
    Ok(ConnectionConfig::new(&host, &user, credential))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let config = load_config()?;

    let request = rusty_scp::upload(&config, "demos/oneshot.rs", "oneshot.rs").await?;
    println!("uploaded {} bytes to {}", request.size, request.destination);

    let output = rusty_scp::run_command(&config, "pwd").await?;
    print!("remote working directory: {}", output.stdout_lossy());

    let request = rusty_scp::download(&config, "oneshot.rs", "target/oneshot.rs.copy").await?;
    println!("downloaded {} bytes to {}", request.size, request.destination);

    Ok(())
}
