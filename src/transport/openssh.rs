use openssh::{KnownHosts, SessionBuilder, Stdio};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use super::{RemoteProcess, Transport};
use crate::config::{ConnectionConfig, Credential, HostIdentity, HostKeyDecision, HostVerification};
use crate::error::ScpError;
use crate::types::ExitStatus;

const NULL_KNOWN_HOSTS: &str = "/dev/null";

/// SSH connection through the system OpenSSH client
#[derive(Debug)]
pub struct OpensshConnection {
    session: openssh::Session,
    destination: String,
}

impl OpensshConnection {
    pub(crate) async fn connect(config: &ConnectionConfig) -> Result<Self, ScpError> {
        let mut builder = SessionBuilder::default();
        builder
            .user(config.user.clone())
            .port(config.port)
            .connect_timeout(config.connect_timeout());
        if let Some(control_dir) = &config.control_dir {
            builder.control_directory(control_dir);
        }

        match &config.credential {
            Credential::KeyFile { path } => {
                builder.keyfile(path);
            }
            Credential::Agent => {}
            Credential::Password { .. } => {
                return Err(ScpError::Unsupported(
                    "the openssh backend cannot log in with a password, \
                     use the native backend, a key file or the ssh agent"
                        .to_string(),
                ));
            }
        }

        apply_host_verification(&mut builder, config)?;

        let destination = super::destination(config);
        info!("Connecting to {:?}", destination);
        let session = builder
            .connect(&config.host)
            .await
            .map_err(|e| ScpError::connection(&e))?;
        debug!("Connected to {:?}", destination);
        Ok(Self {
            session,
            destination,
        })
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub async fn close(self) -> Result<(), ScpError> {
        info!("Closing connection to {:?}", self.destination);
        self.session
            .close()
            .await
            .map_err(|e| ScpError::connection(&e))
    }
}

/// openssh checks the key itself, so a callback only picks the checking mode
fn apply_host_verification(
    builder: &mut SessionBuilder,
    config: &ConnectionConfig,
) -> Result<(), ScpError> {
    match &config.host_verification {
        HostVerification::Skip => {
            warn!(
                "Host key verification is disabled for {:?}, the connection is open to impersonation",
                config.host
            );
            builder
                .known_hosts_check(KnownHosts::Accept)
                .user_known_hosts_file(NULL_KNOWN_HOSTS);
        }
        HostVerification::DefaultKnownHosts => {
            builder.known_hosts_check(KnownHosts::Strict);
        }
        HostVerification::KnownHostsFile { path } => {
            builder
                .known_hosts_check(KnownHosts::Strict)
                .user_known_hosts_file(path);
        }
        HostVerification::AcceptNew => {
            builder.known_hosts_check(KnownHosts::Add);
        }
        HostVerification::Callback(callback) => {
            let identity = HostIdentity {
                host: config.host.clone(),
                port: config.port,
                user: config.user.clone(),
                key: None,
            };
            let check = match callback.decide(&identity) {
                HostKeyDecision::Reject => {
                    return Err(ScpError::Connection(format!(
                        "host key policy rejected {}:{}",
                        config.host, config.port
                    )));
                }
                HostKeyDecision::Strict => KnownHosts::Strict,
                HostKeyDecision::AcceptNew => KnownHosts::Add,
                HostKeyDecision::Accept => {
                    warn!("Host key policy accepts any key from {:?}", config.host);
                    KnownHosts::Accept
                }
            };
            builder.known_hosts_check(check);
        }
    }
    Ok(())
}

impl Transport for OpensshConnection {
    async fn spawn(&self, command: &str) -> Result<RemoteProcess<'_>, ScpError> {
        debug!("Starting remote command {:?} on {:?}", command, self.destination);
        // the command line is handed to the remote shell as is
        let mut child = self
            .session
            .raw_command(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .await
            .map_err(|e| ScpError::session(&e))?;

        let stdin = child
            .stdin()
            .take()
            .ok_or_else(|| ScpError::Session("remote stdin is not piped".to_string()))?;
        let stdout = child
            .stdout()
            .take()
            .ok_or_else(|| ScpError::Session("remote stdout is not piped".to_string()))?;
        let stderr = child.stderr().take();

        let exit = async move {
            let mut captured = Vec::new();
            if let Some(mut stderr) = stderr {
                if let Err(e) = stderr.read_to_end(&mut captured).await {
                    debug!("Reading remote stderr failed: {:?}", e);
                }
            }
            let stderr = String::from_utf8_lossy(&captured).into_owned();
            match child.wait().await {
                Ok(status) => Ok(ExitStatus {
                    code: status.code(),
                    stderr,
                }),
                Err(openssh::Error::RemoteProcessTerminated) => {
                    Ok(ExitStatus { code: None, stderr })
                }
                Err(e) => Err(ScpError::session(&e)),
            }
        };

        Ok(RemoteProcess::new(stdin, stdout, exit))
    }

    async fn check(&self) -> Result<(), ScpError> {
        self.session
            .check()
            .await
            .map_err(|e| ScpError::connection(&e))
    }
}
