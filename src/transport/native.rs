use bytes::BytesMut;
use russh::client::{self, Handle, Handler, Msg};
use russh::keys::agent::client::AgentClient;
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey};
use russh::{Channel, ChannelMsg, Disconnect};
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::{debug, info, warn};

use super::{RemoteProcess, Transport};
use crate::config::{
    ConnectionConfig, Credential, HostIdentity, HostKey, HostKeyDecision, HostVerification,
};
use crate::error::ScpError;
use crate::types::ExitStatus;

const PIPE_CAPACITY: usize = 64 * 1024;
const EXTENDED_DATA_STDERR: u32 = 1;

/// SSH connection through the in-process russh client
pub struct NativeConnection {
    handle: Handle<HostKeyCheck>,
    destination: String,
}

impl fmt::Debug for NativeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeConnection")
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

impl NativeConnection {
    pub(crate) async fn connect(config: &ConnectionConfig) -> Result<Self, ScpError> {
        let destination = super::destination(config);
        info!("Connecting to {:?}", destination);

        let limit = config.connect_timeout();
        let connecting = client::connect(
            Arc::new(client::Config::default()),
            (config.host.as_str(), config.port),
            HostKeyCheck::new(config),
        );
        let mut handle = tokio::time::timeout(limit, connecting)
            .await
            .map_err(|_| {
                ScpError::Connection(format!("no answer from {destination} within {limit:?}"))
            })??;

        if !authenticate(&mut handle, config).await? {
            return Err(ScpError::Connection(format!(
                "authentication as {:?} was rejected",
                config.user
            )));
        }
        debug!("Connected to {:?}", destination);
        Ok(Self {
            handle,
            destination,
        })
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub async fn close(self) -> Result<(), ScpError> {
        info!("Closing connection to {:?}", self.destination);
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| ScpError::connection(&e))
    }
}

async fn authenticate(
    handle: &mut Handle<HostKeyCheck>,
    config: &ConnectionConfig,
) -> Result<bool, ScpError> {
    let user = config.user.as_str();
    match &config.credential {
        Credential::Password { password } => Ok(handle
            .authenticate_password(user, password.as_str())
            .await?
            .success()),
        Credential::KeyFile { path } => {
            let key = russh::keys::load_secret_key(path, None)
                .map_err(|e| ScpError::Config(format!("failed to load key {path:?}: {e}")))?;
            let hash = handle.best_supported_rsa_hash().await?.flatten();
            Ok(handle
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash))
                .await?
                .success())
        }
        Credential::Agent => {
            let mut agent = AgentClient::connect_env()
                .await
                .map_err(|e| ScpError::connection(&e))?;
            let identities = agent
                .request_identities()
                .await
                .map_err(|e| ScpError::connection(&e))?;
            let hash = handle.best_supported_rsa_hash().await?.flatten();
            for identity in identities {
                match handle
                    .authenticate_publickey_with(user, identity.public_key().into_owned(), hash, &mut agent)
                    .await
                {
                    Ok(result) if result.success() => return Ok(true),
                    Ok(_) => {}
                    Err(e) => debug!("Agent identity was not accepted: {:?}", e),
                }
            }
            Ok(false)
        }
    }
}

/// Verifies the server's key during the handshake
struct HostKeyCheck {
    host: String,
    port: u16,
    user: String,
    verification: HostVerification,
}

impl HostKeyCheck {
    fn new(config: &ConnectionConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            verification: config.host_verification.clone(),
        }
    }

    fn verify(&self, key: &PublicKey) -> Result<bool, ScpError> {
        match &self.verification {
            HostVerification::Skip => {
                warn!(
                    "Host key verification is disabled for {:?}, the connection is open to impersonation",
                    self.host
                );
                Ok(true)
            }
            HostVerification::DefaultKnownHosts => Ok(self.known(
                russh::keys::check_known_hosts(&self.host, self.port, key),
            )),
            HostVerification::KnownHostsFile { path } => Ok(self.known(
                russh::keys::check_known_hosts_path(&self.host, self.port, key, path),
            )),
            HostVerification::AcceptNew => self.accept_new(key),
            HostVerification::Callback(callback) => {
                let identity = HostIdentity {
                    host: self.host.clone(),
                    port: self.port,
                    user: self.user.clone(),
                    key: Some(host_key(key)),
                };
                match callback.decide(&identity) {
                    HostKeyDecision::Reject => Ok(false),
                    HostKeyDecision::Strict => Ok(self.known(russh::keys::check_known_hosts(
                        &self.host, self.port, key,
                    ))),
                    HostKeyDecision::AcceptNew => self.accept_new(key),
                    HostKeyDecision::Accept => Ok(true),
                }
            }
        }
    }

    fn known(&self, checked: Result<bool, russh::keys::Error>) -> bool {
        match checked {
            Ok(true) => true,
            Ok(false) => {
                warn!("{}:{} is not a known host", self.host, self.port);
                false
            }
            Err(e) => {
                warn!("Host key check for {}:{} failed: {}", self.host, self.port, e);
                false
            }
        }
    }

    fn accept_new(&self, key: &PublicKey) -> Result<bool, ScpError> {
        match russh::keys::check_known_hosts(&self.host, self.port, key) {
            Ok(true) => Ok(true),
            Ok(false) => {
                russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, key).map_err(|e| {
                    ScpError::Connection(format!("failed to record the host key: {e}"))
                })?;
                info!("Recorded new host key for {}:{}", self.host, self.port);
                Ok(true)
            }
            Err(e) => {
                warn!("Host key check for {}:{} failed: {}", self.host, self.port, e);
                Ok(false)
            }
        }
    }
}

fn host_key(key: &PublicKey) -> HostKey {
    HostKey {
        algorithm: key.algorithm().as_str().to_string(),
        fingerprint: key.fingerprint(HashAlg::Sha256).to_string(),
        openssh: key.to_openssh().unwrap_or_default(),
    }
}

impl Handler for HostKeyCheck {
    type Error = ScpError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        self.verify(server_public_key)
    }
}

impl Transport for NativeConnection {
    async fn spawn(&self, command: &str) -> Result<RemoteProcess<'_>, ScpError> {
        debug!("Starting remote command {:?} on {:?}", command, self.destination);
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ScpError::session(&e))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| ScpError::session(&e))?;

        let (stdin, stdin_rx) = tokio::io::duplex(PIPE_CAPACITY);
        let (stdout_tx, stdout) = tokio::io::duplex(PIPE_CAPACITY);
        Ok(RemoteProcess::new(stdin, stdout, pump(channel, stdin_rx, stdout_tx)))
    }

    async fn check(&self) -> Result<(), ScpError> {
        if self.handle.is_closed() {
            return Err(ScpError::Connection(format!(
                "connection to {} is closed",
                self.destination
            )));
        }
        Ok(())
    }
}

/// Moves bytes between the local pipes and the channel until the channel
/// closes, then reports how the command ended
async fn pump(
    mut channel: Channel<Msg>,
    mut stdin: DuplexStream,
    stdout: DuplexStream,
) -> Result<ExitStatus, ScpError> {
    let mut stdout = Some(stdout);
    let mut stdin_open = true;
    let mut buffer = BytesMut::zeroed(PIPE_CAPACITY);
    let mut stderr = Vec::new();
    let mut code = None;

    loop {
        tokio::select! {
            read = stdin.read(&mut buffer), if stdin_open => {
                let read = read?;
                if read == 0 {
                    stdin_open = false;
                    channel.eof().await.map_err(|e| ScpError::session(&e))?;
                } else {
                    channel
                        .data(&buffer[..read])
                        .await
                        .map_err(|e| ScpError::session(&e))?;
                }
            }
            message = channel.wait() => {
                let Some(message) = message else { break };
                match message {
                    ChannelMsg::Data { data } => {
                        if let Some(out) = stdout.as_mut() {
                            if out.write_all(&data).await.is_err() {
                                // nobody reads stdout any more
                                stdout = None;
                            }
                        }
                    }
                    ChannelMsg::ExtendedData { data, ext } if ext == EXTENDED_DATA_STDERR => {
                        stderr.extend_from_slice(&data);
                    }
                    ChannelMsg::ExitStatus { exit_status } => {
                        code = i32::try_from(exit_status).ok();
                    }
                    ChannelMsg::ExitSignal { signal_name, .. } => {
                        debug!("Remote command killed by {:?}", signal_name);
                    }
                    ChannelMsg::Eof => stdout = None,
                    ChannelMsg::Failure => {
                        return Err(ScpError::Session(
                            "the server refused to run the command".to_string(),
                        ));
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(ExitStatus {
        code,
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}
