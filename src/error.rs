use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::ExitStatus;

/// Errors produced by the command and file transfer operations
#[derive(Debug, thiserror::Error)]
pub enum ScpError {
    /// The SSH connection could not be established
    #[error("failed to connect to the remote host: {0}")]
    Connection(String),

    /// The connection settings ask for something the transport cannot do
    #[error("unsupported connection setting: {0}")]
    Unsupported(String),

    /// The configuration could not be read or is invalid
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The remote command could not be started
    #[error("failed to start remote command: {0}")]
    Session(String),

    /// The scp control header was malformed
    #[error("malformed scp header: {0}")]
    ProtocolFormat(String),

    /// Fewer bytes were available than the header declared
    #[error("short read, want {expected} bytes but got {received}")]
    ShortRead { expected: u64, received: u64 },

    /// Opening, creating or writing a local file failed
    #[error("local i/o error on {path:?}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading from or writing to the remote command's streams failed
    #[error("remote stream i/o error: {0}")]
    Stream(#[from] io::Error),

    /// A path that must be a regular file is a directory (or something else)
    #[error("{0:?} is not a regular file")]
    NotRegularFile(PathBuf),

    /// The remote scp sent an error line instead of a header
    #[error("remote scp error: {0}")]
    Remote(String),

    /// The remote command exited unsuccessfully
    #[error("remote command failed: {status}")]
    RemoteExit { status: ExitStatus },

    /// A protocol step or the exit wait did not finish in time
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// A remote command failed; whatever it printed before failing is kept
    #[error("{source}")]
    Command {
        output: Vec<u8>,
        #[source]
        source: Box<ScpError>,
    },
}

impl ScpError {
    pub(crate) fn local_io(path: impl AsRef<Path>, source: io::Error) -> Self {
        ScpError::LocalIo {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn connection(err: &(dyn std::error::Error + 'static)) -> Self {
        ScpError::Connection(error_chain(err))
    }

    pub(crate) fn session(err: &(dyn std::error::Error + 'static)) -> Self {
        ScpError::Session(error_chain(err))
    }

    /// Output captured from a remote command before it failed
    pub fn partial_output(&self) -> Option<&[u8]> {
        match self {
            ScpError::Command { output, .. } => Some(output),
            _ => None,
        }
    }

    /// The underlying error, looking through [`ScpError::Command`]
    pub fn root(&self) -> &ScpError {
        match self {
            ScpError::Command { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<russh::Error> for ScpError {
    fn from(err: russh::Error) -> Self {
        ScpError::connection(&err)
    }
}

/// Renders an error with its sources, `outer: inner: innermost`
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
