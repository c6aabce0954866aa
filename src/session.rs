use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::client::ScpClient;
use crate::config::ConnectionConfig;
use crate::error::ScpError;
use crate::transport::{Connection, Transport};
use crate::types::ScpClientConfig;

/// Manager for one SSH connection that hands out scp clients
#[derive(Debug, Default)]
pub struct ScpSessionManager {
    pub session: Option<Arc<Connection>>,
}

impl ScpSessionManager {
    /// Establishes a new SSH connection to the remote host
    ///
    /// # Arguments
    ///
    /// * `config` - Where to connect, as whom, and how to verify the host
    ///
    /// # Returns
    ///
    /// Returns a new `ScpSessionManager` with an active SSH connection
    ///
    /// # Example
    ///
    /// ```ignore
    /// let config = ConnectionConfig::new(
    ///     "example.com:22",
    ///     "user",
    ///     Credential::key_file("/home/user/.ssh/id_ed25519"),
    /// );
    /// let manager = ScpSessionManager::connect(&config).await?;
    /// ```
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, ScpError> {
        let connection = Connection::connect(config).await?;
        Ok(Self {
            session: Some(Arc::new(connection)),
        })
    }

    /// Creates a new scp client from the managed connection
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration for the client (buffer size, io timeout)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The SSH connection is not established
    /// - The connection check fails (connection is dead)
    ///
    /// # Example
    ///
    /// ```ignore
    /// let client = manager.create_scp_client(ScpClientConfig::new(
    ///     32_768,
    ///     Some(Duration::from_secs(30)),
    /// )).await?;
    /// ```
    pub async fn create_scp_client(&self, config: ScpClientConfig) -> Result<ScpClient, ScpError> {
        debug!("Creating scp client from session");
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| ScpError::Connection("SSH session not connected".to_string()))?;
        session.check().await.map_err(|e| {
            error!("SSH session check failed: {}", e);
            ScpError::Connection("ssh session is already closed".to_string())
        })?;
        debug!("scp client created successfully");
        Ok(ScpClient::new(session.clone(), config))
    }

    /// Closes the SSH connection if no scp clients are using it
    ///
    /// # Returns
    ///
    /// Returns `Ok(())` if the connection was closed, or an error if:
    /// - Some scp clients still hold references to the connection
    /// - The connection was already closed
    /// - There was an error closing the connection
    ///
    /// # Note
    ///
    /// Uses `Arc::try_unwrap`, so every client must have been dropped
    /// first. Otherwise the connection stays open and an error is returned.
    pub async fn close(&mut self) -> Result<(), ScpError> {
        match self.session.take() {
            Some(session) => match Arc::try_unwrap(session) {
                Ok(connection) => {
                    info!("No scp client is using the session anymore so can close the session");
                    connection.close().await
                }
                Err(session) => {
                    error!("Some scp client still has the session instance so could not close session");
                    self.session = Some(session);
                    Err(ScpError::Connection(
                        "ssh session is still in use by a scp client".to_string(),
                    ))
                }
            },
            None => {
                error!("Session not found");
                Err(ScpError::Connection("SSH session not connected".to_string()))
            }
        }
    }

    /// Checks if the SSH connection is still active
    ///
    /// Returns `true` if the connection is responsive. A dead connection is
    /// removed from the manager.
    pub async fn connected(&mut self) -> bool {
        match self.session.as_ref() {
            Some(session) => {
                if session.check().await.is_ok() {
                    true
                } else {
                    warn!("Underlying ssh session is dead so setting scp status to disconnected");
                    self.session = None;
                    false
                }
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconnected_manager_refuses_work() {
        let mut manager = ScpSessionManager::default();
        assert!(!manager.connected().await);
        assert!(matches!(
            manager.create_scp_client(ScpClientConfig::default()).await,
            Err(ScpError::Connection(_))
        ));
        assert!(manager.close().await.is_err());
    }
}
