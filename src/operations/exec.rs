use bytes::BytesMut;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info};

use crate::client::ScpClient;
use crate::completion::synchronize;
use crate::error::ScpError;
use crate::transport::{RemoteProcess, Transport};
use crate::types::CommandOutput;
use crate::utils::bounded;

const OUTPUT_CHUNK: usize = 8192;

/// Runs a command on the remote server and collects its stdout
///
/// The command gets an empty stdin. The configured io timeout bounds every
/// read of its output, not the total runtime.
///
/// # Errors
///
/// Returns an error if the command cannot be started. Every later failure,
/// including a non-zero exit, is returned as [`ScpError::Command`] carrying
/// whatever the command printed.
pub async fn exec<T: Transport>(
    client: &ScpClient<T>,
    command: String,
) -> Result<CommandOutput, ScpError> {
    let exec_time = Instant::now();
    let RemoteProcess {
        mut stdin,
        mut stdout,
        exit,
    } = client.transport.spawn(&command).await?;
    info!("Remote command started: {:?}", command);

    let io_timeout = client.config.io_timeout;
    let mut output = Vec::new();
    let foreground = async {
        if let Err(e) = stdin.shutdown().await {
            debug!("Closing remote stdin failed: {:?}", e);
        }
        drop(stdin);

        let mut chunk = BytesMut::zeroed(OUTPUT_CHUNK);
        loop {
            let read = bounded(io_timeout, async {
                Ok::<_, ScpError>(stdout.read(&mut chunk[..]).await?)
            })
            .await?;
            if read == 0 {
                return Ok::<_, ScpError>(());
            }
            output.extend_from_slice(&chunk[..read]);
        }
    };

    let completion = synchronize(foreground, exit, io_timeout).await;
    match completion.into_result() {
        Ok(((), status)) => {
            info!(
                "Remote command {:?} finished ({} bytes of output). Time taken {:?}",
                command,
                output.len(),
                exec_time.elapsed(),
            );
            Ok(CommandOutput {
                stdout: output,
                status,
            })
        }
        Err(err) => {
            error!("Remote command {:?} failed: {}", command, err);
            Err(ScpError::Command {
                output,
                source: Box::new(err),
            })
        }
    }
}
