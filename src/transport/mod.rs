use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::{Backend, ConnectionConfig};
use crate::error::ScpError;
use crate::types::ExitStatus;

mod native;
mod openssh;

pub use native::NativeConnection;
pub use openssh::OpensshConnection;

/// Writable end of a remote command's stdin
pub type RemoteStdin<'a> = Box<dyn AsyncWrite + Send + Unpin + 'a>;

/// Readable end of a remote command's stdout
pub type RemoteStdout<'a> = Box<dyn AsyncRead + Send + Unpin + 'a>;

/// One running remote command
///
/// `exit` resolves once the command has terminated. It has to be polled
/// while the streams are in use: some transports make progress on the
/// channel only through it.
pub struct RemoteProcess<'a> {
    pub stdin: RemoteStdin<'a>,
    pub stdout: RemoteStdout<'a>,
    pub exit: BoxFuture<'a, Result<ExitStatus, ScpError>>,
}

impl<'a> RemoteProcess<'a> {
    pub fn new<W, R, E>(stdin: W, stdout: R, exit: E) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'a,
        R: AsyncRead + Send + Unpin + 'a,
        E: Future<Output = Result<ExitStatus, ScpError>> + Send + 'a,
    {
        Self {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            exit: Box::pin(exit),
        }
    }
}

impl fmt::Debug for RemoteProcess<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteProcess").finish_non_exhaustive()
    }
}

/// Something that can run commands on a remote host
pub trait Transport: Send + Sync {
    /// Starts `command` with piped stdin and stdout
    fn spawn(
        &self,
        command: &str,
    ) -> impl Future<Output = Result<RemoteProcess<'_>, ScpError>> + Send;

    /// Checks the underlying connection is still usable
    fn check(&self) -> impl Future<Output = Result<(), ScpError>> + Send {
        async { Ok(()) }
    }
}

/// An SSH connection made with the backend the config asks for
#[derive(Debug)]
pub enum Connection {
    Openssh(OpensshConnection),
    Native(NativeConnection),
}

impl Connection {
    /// Establishes a new SSH connection to the remote host
    ///
    /// [`Backend::Auto`] picks the native client for password credentials
    /// and host key callbacks, the system OpenSSH client otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid
    /// - The credential or host verification policy cannot be honored
    /// - The host cannot be reached, its key is refused or authentication fails
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, ScpError> {
        config.validate()?;
        match config.resolved_backend() {
            Backend::Native => Ok(Connection::Native(NativeConnection::connect(config).await?)),
            _ => Ok(Connection::Openssh(OpensshConnection::connect(config).await?)),
        }
    }

    /// `user@host:port` this connection was made to
    pub fn destination(&self) -> &str {
        match self {
            Connection::Openssh(connection) => connection.destination(),
            Connection::Native(connection) => connection.destination(),
        }
    }

    /// Closes the SSH connection
    pub async fn close(self) -> Result<(), ScpError> {
        match self {
            Connection::Openssh(connection) => connection.close().await,
            Connection::Native(connection) => connection.close().await,
        }
    }
}

impl Transport for Connection {
    async fn spawn(&self, command: &str) -> Result<RemoteProcess<'_>, ScpError> {
        match self {
            Connection::Openssh(connection) => connection.spawn(command).await,
            Connection::Native(connection) => connection.spawn(command).await,
        }
    }

    async fn check(&self) -> Result<(), ScpError> {
        match self {
            Connection::Openssh(connection) => connection.check().await,
            Connection::Native(connection) => connection.check().await,
        }
    }
}

/// `user@host:port`, as used in log lines
fn destination(config: &ConnectionConfig) -> String {
    format!("{}@{}:{}", config.user, config.host, config.port)
}
