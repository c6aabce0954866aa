use bytes::BytesMut;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempPath;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::client::ScpClient;
use crate::completion::synchronize;
use crate::error::ScpError;
use crate::protocol::{self, ACK, ProtocolFrame};
use crate::transport::{RemoteProcess, Transport};
use crate::types::{FileTransferOperationResult, TransferRequest};
use crate::utils::{bounded, set_file_mode};

/// Downloads a file from the remote server to local storage
///
/// Starts `scp -f` for the remote file and then:
/// 1. Acknowledges, reads the `C` header and acknowledges it
/// 2. Streams exactly the announced number of bytes into a staging file
///    next to the destination
/// 3. Checks the NUL terminator, applies the announced mode and renames
///    the staging file over the destination
/// 4. Sends the final acknowledgment and waits for the remote `scp` to exit
///
/// Parent directories of the destination are created. The destination is
/// left untouched unless the whole file arrived.
///
/// # Arguments
///
/// * `client` - The scp client instance
/// * `remote_path` - Path to the remote file to download
/// * `local_path` - Local destination path
/// * `cancel_token` - Token for cancelling the download operation
///
/// # Returns
///
/// Returns a `FileTransferOperationResult`:
/// - `Completed` with the transfer request built from the remote header
/// - `Cancelled` if the operation was cancelled
///
/// # Errors
///
/// Returns an error if:
/// - The destination is a directory or cannot be written
/// - The remote sends a malformed header or an error line
/// - The stream ends before the announced length
/// - A protocol step times out
/// - The remote `scp` exits unsuccessfully
pub async fn get<T: Transport>(
    client: &ScpClient<T>,
    remote_path: String,
    local_path: String,
    cancel_token: CancellationToken,
) -> Result<FileTransferOperationResult, ScpError> {
    let staged = StagedFile::create(Path::new(&local_path)).await?;
    info!("Local staging file created for {:?}", local_path);
    fetch(client, remote_path, local_path, staged, cancel_token).await
}

/// Runs the download exchange into an already created staging file
pub(crate) async fn fetch<T: Transport>(
    client: &ScpClient<T>,
    remote_path: String,
    local_path: String,
    staged: StagedFile,
    cancel_token: CancellationToken,
) -> Result<FileTransferOperationResult, ScpError> {
    let download_time = Instant::now();
    let command = protocol::source_command(&client.config.scp_program, &remote_path);
    let RemoteProcess {
        stdin,
        stdout,
        exit,
    } = client.transport.spawn(&command).await?;
    info!("Remote sender started: {:?}", command);

    let io_size = client.config.io_size;
    let io_timeout = client.config.io_timeout;
    let foreground = async move {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                info!("Download operation cancelled by user");
                Ok(None)
            }
            received = receive_file(stdin, stdout, staged, io_size, io_timeout) => {
                received.map(Some)
            }
        }
    };

    let completion = synchronize(foreground, exit, io_timeout).await;
    match completion.into_transfer_result() {
        Ok(Some((frame, status))) => {
            debug!("Remote sender exited: {}", status);
            info!(
                "File {:?} downloaded ({} bytes). Time taken {:?}",
                remote_path,
                frame.length,
                download_time.elapsed(),
            );
            Ok(FileTransferOperationResult::Completed(TransferRequest {
                source: remote_path,
                destination: local_path,
                mode: frame.mode,
                size: frame.length,
            }))
        }
        Ok(None) => Ok(FileTransferOperationResult::Cancelled {
            src_file: remote_path,
            dest_file: local_path,
        }),
        Err(err) => {
            error!("Download of {:?} to {:?} failed: {}", remote_path, local_path, err);
            Err(err)
        }
    }
}

/// Runs the sink side of the exchange and commits the staging file
async fn receive_file<W, R>(
    mut writer: W,
    reader: R,
    mut staged: StagedFile,
    io_size: usize,
    io_timeout: Option<Duration>,
) -> Result<ProtocolFrame, ScpError>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);

    send_ack(&mut writer, io_timeout).await?;
    let frame = bounded(io_timeout, protocol::read_header(&mut reader)).await?;
    debug!("Received header {:?}", frame);
    // payload plus the terminator must stay countable
    let Some(expected) = frame.length.checked_add(1) else {
        return Err(ScpError::ProtocolFormat(format!(
            "announced length {} is out of range",
            frame.length
        )));
    };
    send_ack(&mut writer, io_timeout).await?;

    let mut buffer = BytesMut::zeroed(io_size.max(1));
    let mut received: u64 = 0;
    while received < frame.length {
        let want = (frame.length - received).min(buffer.len() as u64) as usize;
        let read = bounded(io_timeout, async {
            Ok::<_, ScpError>(reader.read(&mut buffer[..want]).await?)
        })
        .await?;
        if read == 0 {
            error!("Remote stream ended after {} of {} bytes", received, frame.length);
            return Err(ScpError::ShortRead { expected, received });
        }
        staged.write(&buffer[..read]).await?;
        received += read as u64;
    }

    let mut terminator = [0u8; 1];
    let read = bounded(io_timeout, async {
        Ok::<_, ScpError>(reader.read(&mut terminator).await?)
    })
    .await?;
    if read == 0 {
        return Err(ScpError::ShortRead { expected, received });
    }
    if terminator[0] != ACK {
        // a sender that failed mid-file reports why on the rest of the line
        let mut message = Vec::new();
        bounded(io_timeout, async {
            (&mut reader)
                .take(protocol::MAX_HEADER_LEN)
                .read_until(b'\n', &mut message)
                .await?;
            Ok::<_, ScpError>(())
        })
        .await?;
        let message = String::from_utf8_lossy(&message).trim().to_string();
        return Err(match terminator[0] {
            1 | 2 => ScpError::Remote(message),
            other => ScpError::ProtocolFormat(format!(
                "expected NUL after the file contents, got {other:#04x}"
            )),
        });
    }

    staged.commit(frame.mode).await?;
    send_ack(&mut writer, io_timeout).await?;
    bounded(io_timeout, async {
        writer.shutdown().await?;
        Ok::<_, ScpError>(())
    })
    .await?;
    Ok(frame)
}

async fn send_ack<W>(writer: &mut W, io_timeout: Option<Duration>) -> Result<(), ScpError>
where
    W: AsyncWrite + Unpin,
{
    bounded(io_timeout, async {
        writer.write_all(&[ACK]).await?;
        writer.flush().await?;
        Ok::<_, ScpError>(())
    })
    .await
}

/// Temporary file in the destination's directory. Dropping it without
/// [`StagedFile::commit`] removes it.
#[derive(Debug)]
pub(crate) struct StagedFile {
    file: fs::File,
    path: TempPath,
    destination: PathBuf,
}

impl StagedFile {
    pub(crate) async fn create(destination: &Path) -> Result<Self, ScpError> {
        if let Ok(metadata) = fs::metadata(destination).await {
            if metadata.is_dir() {
                error!("Download destination {:?} is a directory", destination);
                return Err(ScpError::NotRegularFile(destination.to_path_buf()));
            }
        }

        let parent = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)
            .await
            .map_err(|e| ScpError::local_io(parent, e))?;

        let parent = parent.to_path_buf();
        let staged = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(".scp-")
                .suffix(".part")
                .tempfile_in(&parent)
                .map_err(|e| ScpError::local_io(&parent, e))
        })
        .await
        .map_err(|e| ScpError::local_io(destination, std::io::Error::other(e)))??;

        let (file, path) = staged.into_parts();
        debug!("Staging {:?} at {:?}", destination, path);
        Ok(Self {
            file: fs::File::from_std(file),
            path,
            destination: destination.to_path_buf(),
        })
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), ScpError> {
        self.file
            .write_all(data)
            .await
            .map_err(|e| ScpError::local_io(&self.path, e))
    }

    /// Applies `mode` and moves the staging file over the destination
    async fn commit(self, mode: u32) -> Result<(), ScpError> {
        let StagedFile {
            mut file,
            path,
            destination,
        } = self;
        file.flush()
            .await
            .map_err(|e| ScpError::local_io(&path, e))?;
        drop(file);

        set_file_mode(&path, mode).await?;
        path.persist(&destination)
            .map_err(|e| ScpError::local_io(&destination, e.error))?;
        debug!("Committed {:?} with mode {:o}", destination, mode);
        Ok(())
    }
}
