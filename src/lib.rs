// Module declarations
mod client;
mod completion;
mod config;
mod error;
mod oneshot;
mod operations;
pub mod protocol;
mod session;
mod transport;
mod types;
mod utils;

// Public API exports
pub use client::ScpClient;
pub use config::{
    Backend, ConnectionConfig, Credential, HostIdentity, HostKey, HostKeyCallback, HostKeyDecision,
    HostVerification,
};
pub use error::ScpError;
pub use oneshot::{download, run_command, upload};
pub use session::ScpSessionManager;
pub use transport::{
    Connection, NativeConnection, OpensshConnection, RemoteProcess, RemoteStdin, RemoteStdout,
    Transport,
};
pub use types::{
    CommandOutput, ExitStatus, FileTransferOperationResult, ScpClientConfig, TransferRequest,
};

// Re-export commonly used external types for convenience
pub use tokio_util::sync::CancellationToken;
