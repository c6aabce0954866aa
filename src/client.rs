use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ScpError;
use crate::operations::{download, exec, upload};
use crate::transport::{Connection, Transport};
use crate::types::{CommandOutput, FileTransferOperationResult, ScpClientConfig, ScpClientConfigArc};

/// Client for running commands and copying single files over one connection
#[derive(Debug)]
pub struct ScpClient<T = Connection> {
    pub(crate) transport: Arc<T>,
    pub(crate) config: ScpClientConfigArc,
}

impl<T: Transport> ScpClient<T> {
    /// Creates a new client sharing a managed connection (internal use)
    pub(crate) fn new(transport: Arc<T>, config: ScpClientConfig) -> Self {
        Self {
            transport,
            config: config.into(),
        }
    }

    /// Creates a client that owns `transport`
    ///
    /// # Example
    ///
    /// ```ignore
    /// let connection = Connection::connect(&connection_config).await?;
    /// let client = ScpClient::with_transport(connection, ScpClientConfig::default());
    /// ```
    pub fn with_transport(transport: T, config: ScpClientConfig) -> Self {
        Self::new(Arc::new(transport), config)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &ScpClientConfig {
        &self.config
    }

    /// Runs a command on the remote server
    ///
    /// # Arguments
    ///
    /// * `command` - Command line, interpreted by the remote user's shell
    ///
    /// # Returns
    ///
    /// Returns the command's stdout and exit status if it exited with 0
    ///
    /// # Example
    ///
    /// ```ignore
    /// let output = client.exec("pwd").await?;
    /// println!("{}", output.stdout_lossy());
    /// ```
    pub async fn exec(&self, command: &str) -> Result<CommandOutput, ScpError> {
        exec::exec(self, command.to_string()).await
    }

    /// Uploads a local file to the remote server
    ///
    /// # Arguments
    ///
    /// * `local_path` - Path to the local file
    /// * `remote_path` - Destination path on the remote server
    /// * `cancel_token` - Token for cancelling the upload
    ///
    /// # Returns
    ///
    /// Returns a `FileTransferOperationResult` indicating completion or cancellation
    ///
    /// # Example
    ///
    /// ```ignore
    /// let cancel_token = CancellationToken::new();
    /// let result = client.put(
    ///     "/local/file.txt".to_string(),
    ///     "/remote/file.txt".to_string(),
    ///     cancel_token,
    /// ).await?;
    /// ```
    pub async fn put(
        &self,
        local_path: String,
        remote_path: String,
        cancel_token: CancellationToken,
    ) -> Result<FileTransferOperationResult, ScpError> {
        upload::put(self, local_path, remote_path, cancel_token).await
    }

    /// Downloads a file from the remote server to local storage
    ///
    /// # Arguments
    ///
    /// * `remote_path` - Path to the remote file
    /// * `local_path` - Local destination path
    /// * `cancel_token` - Token for cancelling the download
    ///
    /// # Returns
    ///
    /// Returns a `FileTransferOperationResult` indicating completion or cancellation
    ///
    /// # Example
    ///
    /// ```ignore
    /// let cancel_token = CancellationToken::new();
    /// let result = client.get(
    ///     "/remote/file.txt".to_string(),
    ///     "/local/file.txt".to_string(),
    ///     cancel_token,
    /// ).await?;
    /// ```
    pub async fn get(
        &self,
        remote_path: String,
        local_path: String,
        cancel_token: CancellationToken,
    ) -> Result<FileTransferOperationResult, ScpError> {
        download::get(self, remote_path, local_path, cancel_token).await
    }

    /// Gives back the transport if no other client shares it
    pub fn into_transport(self) -> Option<T> {
        Arc::try_unwrap(self.transport).ok()
    }
}

impl ScpClient<Connection> {
    /// Closes the SSH connection if this client is its last user,
    /// otherwise only releases this client's handle
    ///
    /// # Example
    ///
    /// ```ignore
    /// client.close().await?;
    /// ```
    pub async fn close(self) -> Result<(), ScpError> {
        match self.into_transport() {
            Some(connection) => connection.close().await,
            None => {
                debug!("Connection is still shared, leaving it open");
                Ok(())
            }
        }
    }
}
