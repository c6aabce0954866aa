//! Connection settings: where to connect, who to be, and how far to trust
//! the host key the server presents.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ScpError;

const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 60;

/// Settings for one SSH connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Hostname or IP address of the remote server
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub credential: Credential,
    #[serde(default)]
    pub host_verification: HostVerification,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Directory for SSH control sockets, the user state dir when unset.
    /// Only used by the openssh backend.
    #[serde(default)]
    pub control_dir: Option<PathBuf>,
    #[serde(default)]
    pub backend: Backend,
}

/// SSH implementation a [`crate::Connection`] is made with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// `Native` for password credentials and host key callbacks, `Openssh` otherwise
    #[default]
    Auto,
    /// The system `ssh` client, multiplexed over a control socket
    Openssh,
    /// In-process SSH client
    Native,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

impl ConnectionConfig {
    /// Builds a config from an address such as `example.com` or `10.0.0.5:2222`
    ///
    /// Host verification defaults to [`HostVerification::DefaultKnownHosts`].
    pub fn new(address: &str, user: &str, credential: Credential) -> Self {
        let (host, port) = split_address(address);
        Self {
            host,
            port,
            user: user.to_string(),
            credential,
            host_verification: HostVerification::default(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            control_dir: None,
            backend: Backend::Auto,
        }
    }

    pub fn with_host_verification(mut self, host_verification: HostVerification) -> Self {
        self.host_verification = host_verification;
        self
    }

    pub fn with_control_dir(mut self, control_dir: impl Into<PathBuf>) -> Self {
        self.control_dir = Some(control_dir.into());
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// The backend that will actually be used, never [`Backend::Auto`]
    pub fn resolved_backend(&self) -> Backend {
        match self.backend {
            Backend::Auto => {
                let password = matches!(self.credential, Credential::Password { .. });
                let callback = matches!(self.host_verification, HostVerification::Callback(_));
                if password || callback {
                    Backend::Native
                } else {
                    Backend::Openssh
                }
            }
            chosen => chosen,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Parses a JSON document into a validated config
    pub fn from_json_str(json: &str) -> Result<Self, ScpError> {
        let mut config: Self =
            serde_json::from_str(json).map_err(|e| ScpError::Config(e.to_string()))?;
        // `host:port` is accepted in the host field as well
        if config.port == DEFAULT_SSH_PORT {
            let (host, port) = split_address(&config.host);
            config.host = host;
            config.port = port;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ScpError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ScpError::Config(format!("failed to read {path:?}: {e}")))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ScpError> {
        if self.host.trim().is_empty() {
            return Err(ScpError::Config("host must not be empty".to_string()));
        }
        if self.user.trim().is_empty() {
            return Err(ScpError::Config("user must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ScpError::Config("port must not be 0".to_string()));
        }
        Ok(())
    }
}

/// Splits `host:port`; anything without a numeric port suffix is a bare host
fn split_address(address: &str) -> (String, u16) {
    let address = address.trim();
    if let Some((host, port)) = address.rsplit_once(':') {
        // bare IPv6 literals contain colons of their own
        if !host.contains(':') {
            if let Ok(port) = port.parse::<u16>() {
                return (host.to_string(), port);
            }
        }
    }
    let host = address.trim_start_matches('[').trim_end_matches(']');
    (host.to_string(), DEFAULT_SSH_PORT)
}

/// How the client proves its identity
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Credential {
    Password { password: String },
    KeyFile { path: PathBuf },
    Agent,
}

impl Credential {
    pub fn password(password: impl Into<String>) -> Self {
        Credential::Password {
            password: password.into(),
        }
    }

    pub fn key_file(path: impl Into<PathBuf>) -> Self {
        Credential::KeyFile { path: path.into() }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password { .. } => f
                .debug_struct("Password")
                .field("password", &"<redacted>")
                .finish(),
            Credential::KeyFile { path } => f.debug_struct("KeyFile").field("path", path).finish(),
            Credential::Agent => f.write_str("Agent"),
        }
    }
}

/// The host being connected to, as handed to a [`HostKeyCallback`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// The key the server presented. The openssh backend asks before
    /// dialing and checks the key itself, so it is `None` there.
    pub key: Option<HostKey>,
}

/// A server's public host key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKey {
    /// e.g. `ssh-ed25519`
    pub algorithm: String,
    /// `SHA256:` fingerprint as printed by `ssh-keygen -l`
    pub fingerprint: String,
    /// The key in `authorized_keys` / `known_hosts` format
    pub openssh: String,
}

/// What a [`HostKeyCallback`] wants done with the host's key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyDecision {
    /// Do not connect
    Reject,
    /// The key must already be in the known hosts file
    Strict,
    /// Trust and record the key if the host is unknown, reject changed keys
    AcceptNew,
    /// Accept any key
    Accept,
}

/// User supplied host verification policy
#[derive(Clone)]
pub struct HostKeyCallback(Arc<dyn Fn(&HostIdentity) -> HostKeyDecision + Send + Sync>);

impl HostKeyCallback {
    pub fn new(
        callback: impl Fn(&HostIdentity) -> HostKeyDecision + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(callback))
    }

    pub fn decide(&self, identity: &HostIdentity) -> HostKeyDecision {
        (self.0)(identity)
    }
}

impl fmt::Debug for HostKeyCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostKeyCallback(..)")
    }
}

/// How the server's host key is verified
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum HostVerification {
    /// Accept any host key and never record it. Insecure.
    Skip,
    /// Strict checking against the user's default known hosts files
    #[default]
    DefaultKnownHosts,
    /// Strict checking against the given known hosts file
    KnownHostsFile { path: PathBuf },
    /// Trust on first use
    AcceptNew,
    /// Let a callback decide per host, and per key on the native backend
    #[serde(skip)]
    Callback(HostKeyCallback),
}

impl HostVerification {
    pub fn callback(
        callback: impl Fn(&HostIdentity) -> HostKeyDecision + Send + Sync + 'static,
    ) -> Self {
        HostVerification::Callback(HostKeyCallback::new(callback))
    }
}
