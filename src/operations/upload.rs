use bytes::BytesMut;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::client::ScpClient;
use crate::completion::synchronize;
use crate::error::ScpError;
use crate::protocol::{self, ACK, ProtocolFrame};
use crate::transport::{RemoteProcess, Transport};
use crate::types::{FileTransferOperationResult, TransferRequest};
use crate::utils::{bounded, file_mode, remote_target};

/// Uploads a local file to the remote server
///
/// Starts `scp -t` in the destination's directory and then:
/// 1. Writes the `C` header with the file's mode, size and name
/// 2. Streams exactly `size` bytes of the file
/// 3. Writes the NUL terminator and closes the remote stdin
/// 4. Waits for the remote `scp` to exit
///
/// The receiver's acknowledgments are not read.
///
/// # Arguments
///
/// * `client` - The scp client instance
/// * `local_path` - Path to the local file to upload
/// * `remote_path` - Destination on the remote server, a trailing `/` keeps the local name
/// * `cancel_token` - Token for cancelling the upload operation
///
/// # Returns
///
/// Returns a `FileTransferOperationResult`:
/// - `Completed` with the transfer request if successful
/// - `Cancelled` if the operation was cancelled
///
/// # Errors
///
/// Returns an error if:
/// - The local file cannot be opened or is not a regular file
/// - The file shrinks while it is being sent
/// - Writing to the remote command fails or times out
/// - The remote `scp` exits unsuccessfully
pub async fn put<T: Transport>(
    client: &ScpClient<T>,
    local_path: String,
    remote_path: String,
    cancel_token: CancellationToken,
) -> Result<FileTransferOperationResult, ScpError> {
    let source = LocalSource::open(local_path, remote_path).await?;
    send(client, source, cancel_token).await
}

/// A local file checked and opened for upload, before any remote work
#[derive(Debug)]
pub(crate) struct LocalSource {
    file: fs::File,
    local_path: String,
    remote_path: String,
    target_dir: String,
    frame: ProtocolFrame,
}

impl LocalSource {
    pub(crate) async fn open(local_path: String, remote_path: String) -> Result<Self, ScpError> {
        let metadata = fs::metadata(&local_path)
            .await
            .map_err(|e| ScpError::local_io(&local_path, e))?;
        if !metadata.is_file() {
            error!("Refusing to upload {:?}, not a regular file", local_path);
            return Err(ScpError::NotRegularFile(PathBuf::from(&local_path)));
        }
        let file = fs::File::open(&local_path)
            .await
            .map_err(|e| ScpError::local_io(&local_path, e))?;
        info!("Local file opened: {:?}", local_path);

        let (target_dir, file_name) = remote_target(&remote_path, &local_path)?;
        let frame = ProtocolFrame::regular_file(file_mode(&metadata), metadata.len(), &file_name)?;
        Ok(Self {
            file,
            local_path,
            remote_path,
            target_dir,
            frame,
        })
    }
}

/// Runs the upload exchange for an opened source
pub(crate) async fn send<T: Transport>(
    client: &ScpClient<T>,
    source: LocalSource,
    cancel_token: CancellationToken,
) -> Result<FileTransferOperationResult, ScpError> {
    let upload_time = Instant::now();
    let LocalSource {
        mut file,
        local_path,
        remote_path,
        target_dir,
        frame,
    } = source;
    let request = TransferRequest {
        source: local_path.clone(),
        destination: remote_path.clone(),
        mode: frame.mode,
        size: frame.length,
    };

    let command = protocol::sink_command(&client.config.scp_program, &target_dir);
    let RemoteProcess {
        mut stdin,
        stdout,
        exit,
    } = client.transport.spawn(&command).await?;
    info!("Remote receiver started: {:?}", command);

    let io_size = client.config.io_size;
    let io_timeout = client.config.io_timeout;
    let source_path = local_path.clone();
    let foreground = async move {
        // acks stay unread, but the stream is held open until the file is sent
        let _stdout = stdout;
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                info!("Upload operation cancelled by user");
                Ok(None)
            }
            sent = send_file(&mut stdin, &mut file, &source_path, &frame, io_size, io_timeout) => {
                sent.map(Some)
            }
        }
    };

    let completion = synchronize(foreground, exit, io_timeout).await;
    match completion.into_transfer_result() {
        Ok(Some((sent, status))) => {
            debug!("Remote receiver exited: {}", status);
            info!(
                "File {:?} uploaded ({} bytes). Time taken {:?}",
                local_path,
                sent,
                upload_time.elapsed(),
            );
            Ok(FileTransferOperationResult::Completed(request))
        }
        Ok(None) => Ok(FileTransferOperationResult::Cancelled {
            src_file: local_path,
            dest_file: remote_path,
        }),
        Err(err) => {
            error!("Upload of {:?} to {:?} failed: {}", local_path, remote_path, err);
            Err(err)
        }
    }
}

/// Writes header, payload and terminator, then closes `writer`.
/// Returns the number of payload bytes sent.
async fn send_file<W, R>(
    writer: &mut W,
    source: &mut R,
    source_path: &str,
    frame: &ProtocolFrame,
    io_size: usize,
    io_timeout: Option<Duration>,
) -> Result<u64, ScpError>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    debug!("Sending header {:?}", frame);
    let header = frame.encode();
    bounded(io_timeout, async {
        writer.write_all(&header).await?;
        Ok::<_, ScpError>(())
    })
    .await?;

    let mut buffer = BytesMut::zeroed(io_size.max(1));
    let mut sent: u64 = 0;
    while sent < frame.length {
        let want = (frame.length - sent).min(buffer.len() as u64) as usize;
        let read = source
            .read(&mut buffer[..want])
            .await
            .map_err(|e| ScpError::local_io(source_path, e))?;
        if read == 0 {
            error!("Local file ended after {} of {} bytes", sent, frame.length);
            return Err(ScpError::ShortRead {
                expected: frame.length,
                received: sent,
            });
        }
        bounded(io_timeout, async {
            writer.write_all(&buffer[..read]).await?;
            Ok::<_, ScpError>(())
        })
        .await?;
        sent += read as u64;
    }

    bounded(io_timeout, async {
        writer.write_all(&[ACK]).await?;
        writer.flush().await?;
        writer.shutdown().await?;
        Ok::<_, ScpError>(())
    })
    .await?;
    Ok(sent)
}
