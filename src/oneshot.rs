//! One call, one connection: connect, do the work, disconnect.

use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::client::ScpClient;
use crate::config::ConnectionConfig;
use crate::error::ScpError;
use crate::operations::download::{self, StagedFile};
use crate::operations::upload::{self, LocalSource};
use crate::transport::Connection;
use crate::types::{CommandOutput, FileTransferOperationResult, ScpClientConfig, TransferRequest};

/// Runs `command` on the host described by `config`
///
/// # Example
///
/// ```ignore
/// let output = rusty_scp::run_command(&config, "uname -a").await?;
/// print!("{}", output.stdout_lossy());
/// ```
pub async fn run_command(
    config: &ConnectionConfig,
    command: &str,
) -> Result<CommandOutput, ScpError> {
    let client = connect(config).await?;
    let result = client.exec(command).await;
    release(client).await;
    result
}

/// Copies the local file `source` to `destination` on the host
///
/// The source is opened before connecting, so a missing file or a
/// directory fails without touching the network.
pub async fn upload(
    config: &ConnectionConfig,
    source: &str,
    destination: &str,
) -> Result<TransferRequest, ScpError> {
    let local = LocalSource::open(source.to_string(), destination.to_string()).await?;
    let client = connect(config).await?;
    let result = upload::send(&client, local, CancellationToken::new()).await;
    release(client).await;
    completed(result?)
}

/// Copies the remote file `source` to the local `destination`
///
/// The staging file next to `destination` is created before connecting.
pub async fn download(
    config: &ConnectionConfig,
    source: &str,
    destination: &str,
) -> Result<TransferRequest, ScpError> {
    let staged = StagedFile::create(Path::new(destination)).await?;
    let client = connect(config).await?;
    let result = download::fetch(
        &client,
        source.to_string(),
        destination.to_string(),
        staged,
        CancellationToken::new(),
    )
    .await;
    release(client).await;
    completed(result?)
}

async fn connect(config: &ConnectionConfig) -> Result<ScpClient, ScpError> {
    let connection = Connection::connect(config).await?;
    Ok(ScpClient::with_transport(connection, ScpClientConfig::default()))
}

async fn release(client: ScpClient) {
    if let Err(e) = client.close().await {
        warn!("Failed to close the ssh connection: {}", e);
    }
}

fn completed(result: FileTransferOperationResult) -> Result<TransferRequest, ScpError> {
    match result {
        FileTransferOperationResult::Completed(request) => Ok(request),
        FileTransferOperationResult::Cancelled { src_file, dest_file } => Err(ScpError::Session(
            format!("copy of {src_file:?} to {dest_file:?} was cancelled"),
        )),
    }
}
