use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A single file copy, as requested or as announced by the remote header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Path the bytes are read from
    pub source: String,
    /// Path the bytes are written to
    pub destination: String,
    /// Unix permission bits of the file
    pub mode: u32,
    /// Size of the file in bytes
    pub size: u64,
}

/// Configuration for scp client operations
#[derive(Debug, Clone)]
pub struct ScpClientConfig {
    /// Buffer size for streaming file contents in bytes
    pub io_size: usize,
    /// Upper bound for every protocol read/write and for the final exit wait
    pub io_timeout: Option<Duration>,
    /// Program started on the remote host for the file copy
    pub scp_program: String,
}

impl Default for ScpClientConfig {
    /// - io_size: 65536 (64KB)
    /// - io_timeout: none
    /// - scp_program: `scp`
    fn default() -> Self {
        Self {
            io_size: 65536,
            io_timeout: None,
            scp_program: "scp".to_string(),
        }
    }
}

impl ScpClientConfig {
    /// Creates a new configuration with custom values
    pub fn new(io_size: usize, io_timeout: Option<Duration>) -> Self {
        Self {
            io_size: io_size.max(1),
            io_timeout,
            ..Self::default()
        }
    }
}

/// Result of a file transfer operation
#[derive(Debug, Clone)]
pub enum FileTransferOperationResult {
    /// Transfer completed successfully
    Completed(TransferRequest),
    /// Transfer was cancelled by user
    Cancelled { src_file: String, dest_file: String },
}

/// How the remote command ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code, `None` when the command was killed or vanished without one
    pub code: Option<i32>,
    /// Whatever the remote command wrote to stderr
    pub stderr: String,
}

impl ExitStatus {
    pub fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            stderr: String::new(),
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}")?,
            None => write!(f, "terminated without an exit code")?,
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, ": {stderr}")?;
        }
        Ok(())
    }
}

/// Output of a remote command that ran to a successful exit
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub status: ExitStatus,
}

impl CommandOutput {
    /// Stdout decoded as UTF-8, with invalid sequences replaced
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Internal configuration wrapper with Arc for shared ownership
#[derive(Debug, Clone)]
pub(crate) struct ScpClientConfigArc {
    pub(crate) inner: Arc<ScpClientConfig>,
}

impl From<ScpClientConfig> for ScpClientConfigArc {
    fn from(config: ScpClientConfig) -> Self {
        Self {
            inner: Arc::new(config),
        }
    }
}

impl std::ops::Deref for ScpClientConfigArc {
    type Target = ScpClientConfig;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_display_includes_stderr() {
        let status = ExitStatus::from_code(1).with_stderr("scp: /root/x: Permission denied\n");
        assert!(!status.success());
        assert_eq!(
            status.to_string(),
            "exit code 1: scp: /root/x: Permission denied"
        );
        assert_eq!(
            ExitStatus::default().to_string(),
            "terminated without an exit code"
        );
    }

    #[test]
    fn client_config_never_uses_empty_buffer() {
        let config = ScpClientConfig::new(0, Some(Duration::from_secs(5)));
        assert_eq!(config.io_size, 1);
        assert_eq!(config.scp_program, "scp");
    }
}
