// demos/basic_usage.rs
// Run with: cargo run --example basic_usage

use rusty_scp::{
    CancellationToken, ConnectionConfig, Credential, FileTransferOperationResult,
    HostVerification, ScpClientConfig, ScpSessionManager,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    // 1. Connect to SSH server
    let config = ConnectionConfig::new(
        "example.com:22",
        "your_username",
        Credential::key_file("/home/user/.ssh/id_ed25519"),
    )
    .with_host_verification(HostVerification::AcceptNew)
    .with_control_dir("/tmp/ssh_control");

    let mut session_manager = ScpSessionManager::connect(&config)
        .await
        .map_err(|e| anyhow::anyhow!("Connection failed: {}", e))?;

    println!("✅ Connected to SSH server");

    // 2. Create scp client with custom configuration
    let client = session_manager
        .create_scp_client(ScpClientConfig::new(
            65_536,                        // 64KB buffer size
            Some(Duration::from_secs(30)), // per step timeout
        ))
        .await?;

    println!("✅ scp client created");

    // 3. Run a command
    let output = client.exec("ls -l /remote/directory").await?;
    println!("\n📂 /remote/directory:\n{}", output.stdout_lossy());

    // 4. Create cancellation token for transfers
    let cancel_token = CancellationToken::new();

    // 5. Upload a file
    println!("\n⬆️  Uploading file...");
    let upload_result = client
        .put(
            "/local/path/document.pdf".to_string(),
            "/remote/path/document.pdf".to_string(),
            cancel_token.clone(),
        )
        .await?;

    match upload_result {
        FileTransferOperationResult::Completed(request) => {
            println!(
                "✅ Upload completed: {} bytes, mode {:o}",
                request.size, request.mode
            );
        }
        FileTransferOperationResult::Cancelled {
            src_file,
            dest_file,
        } => {
            println!("❌ Upload cancelled: {} -> {}", src_file, dest_file);
        }
    }

    // 6. Download a file
    println!("\n⬇️  Downloading file...");
    let download_result = client
        .get(
            "/remote/path/config.json".to_string(),
            "/local/path/config.json".to_string(),
            cancel_token.clone(),
        )
        .await?;

    match download_result {
        FileTransferOperationResult::Completed(request) => {
            println!("✅ Download completed: {} bytes", request.size);
        }
        FileTransferOperationResult::Cancelled {
            src_file,
            dest_file,
        } => {
            println!("❌ Download cancelled: {} -> {}", src_file, dest_file);
        }
    }

    // 7. Cleanup
    println!("\n🧹 Cleaning up...");
    drop(client);
    session_manager.close().await?;

    println!("✅ All done!");

    Ok(())
}
