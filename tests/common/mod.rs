#![allow(dead_code)]

use futures::future::BoxFuture;
use rusty_scp::{ExitStatus, RemoteProcess, ScpClient, ScpClientConfig, ScpError, Transport};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_test::io::Mock;

const PIPE_CAPACITY: usize = 64 * 1024;

/// In-process stand-in for a host running `scp`, backed by the local
/// filesystem. Absolute paths only.
#[derive(Default)]
pub struct FakeHost {
    commands: Mutex<Vec<String>>,
    received: Arc<Mutex<Vec<u8>>>,
    canned: HashMap<String, (Vec<u8>, i32)>,
    source_script: Option<Vec<u8>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `command` with `stdout` and exit `code`
    pub fn with_command(mut self, command: &str, stdout: &[u8], code: i32) -> Self {
        self.canned
            .insert(command.to_string(), (stdout.to_vec(), code));
        self
    }

    /// Makes `scp -f` send these bytes after the first ack instead of a file
    pub fn with_source_script(mut self, bytes: &[u8]) -> Self {
        self.source_script = Some(bytes.to_vec());
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Everything written to `scp -t` stdin so far
    pub fn received(&self) -> Vec<u8> {
        self.received.lock().unwrap().clone()
    }
}

impl Transport for FakeHost {
    async fn spawn(&self, command: &str) -> Result<RemoteProcess<'_>, ScpError> {
        self.commands.lock().unwrap().push(command.to_string());
        let (stdin, remote_stdin) = tokio::io::duplex(PIPE_CAPACITY);
        let (remote_stdout, stdout) = tokio::io::duplex(PIPE_CAPACITY);

        let exit: BoxFuture<'static, Result<ExitStatus, ScpError>> =
            if let Some(dir) = command.strip_prefix("scp -t ") {
                Box::pin(sink(
                    PathBuf::from(unquote(dir)),
                    remote_stdin,
                    remote_stdout,
                    self.received.clone(),
                ))
            } else if let Some(path) = command.strip_prefix("scp -f ") {
                Box::pin(source(
                    PathBuf::from(unquote(path)),
                    self.source_script.clone(),
                    remote_stdin,
                    remote_stdout,
                ))
            } else if let Some((out, code)) = self.canned.get(command) {
                Box::pin(canned(out.clone(), *code, String::new(), remote_stdin, remote_stdout))
            } else {
                let stderr = format!("sh: {command}: command not found");
                Box::pin(canned(Vec::new(), 127, stderr, remote_stdin, remote_stdout))
            };

        Ok(RemoteProcess::new(stdin, stdout, exit))
    }
}

fn unquote(arg: &str) -> &str {
    arg.strip_prefix('\'')
        .and_then(|arg| arg.strip_suffix('\''))
        .unwrap_or(arg)
}

async fn canned(
    out: Vec<u8>,
    code: i32,
    stderr: String,
    mut input: DuplexStream,
    mut output: DuplexStream,
) -> Result<ExitStatus, ScpError> {
    let _ = output.write_all(&out).await;
    drop(output);
    let mut ignored = Vec::new();
    let _ = input.read_to_end(&mut ignored).await;
    Ok(ExitStatus::from_code(code).with_stderr(stderr))
}

async fn sink(
    dir: PathBuf,
    mut input: DuplexStream,
    mut output: DuplexStream,
    log: Arc<Mutex<Vec<u8>>>,
) -> Result<ExitStatus, ScpError> {
    let _ = output.write_all(&[0]).await;
    let mut received = Vec::new();
    input.read_to_end(&mut received).await?;
    log.lock().unwrap().extend_from_slice(&received);

    match store(&dir, &received) {
        Ok(()) => {
            let _ = output.write_all(&[0]).await;
            Ok(ExitStatus::from_code(0))
        }
        Err(reason) => Ok(ExitStatus::from_code(1).with_stderr(format!("scp: {reason}"))),
    }
}

fn store(dir: &Path, received: &[u8]) -> Result<(), String> {
    let newline = received
        .iter()
        .position(|&b| b == b'\n')
        .ok_or("no header")?;
    let header = std::str::from_utf8(&received[..newline]).map_err(|e| e.to_string())?;
    let fields: Vec<&str> = header
        .strip_prefix('C')
        .ok_or("not a file header")?
        .splitn(3, ' ')
        .collect();
    if fields.len() != 3 {
        return Err(format!("bad header {header:?}"));
    }
    let mode = u32::from_str_radix(fields[0], 8).map_err(|e| e.to_string())?;
    let length: usize = fields[1].parse().map_err(|e: std::num::ParseIntError| e.to_string())?;

    let body = &received[newline + 1..];
    if body.len() != length + 1 || body[length] != 0 {
        return Err("unexpected EOF".to_string());
    }
    let path = dir.join(fields[2]);
    std::fs::write(&path, &body[..length]).map_err(|e| e.to_string())?;
    set_mode(&path, mode);
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) {}

#[cfg(unix)]
fn mode_of(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}

async fn expect_ack(input: &mut DuplexStream) -> bool {
    let mut byte = [0u8; 1];
    matches!(input.read(&mut byte).await, Ok(1)) && byte[0] == 0
}

async fn source(
    path: PathBuf,
    script: Option<Vec<u8>>,
    mut input: DuplexStream,
    mut output: DuplexStream,
) -> Result<ExitStatus, ScpError> {
    let protocol_error = || -> Result<ExitStatus, ScpError> {
        Ok(ExitStatus::from_code(1).with_stderr("scp: protocol error"))
    };
    if !expect_ack(&mut input).await {
        return protocol_error();
    }

    if let Some(script) = script {
        let _ = output.write_all(&script).await;
        drop(output);
        let mut ignored = Vec::new();
        let _ = input.read_to_end(&mut ignored).await;
        return Ok(ExitStatus::from_code(1));
    }

    let read = std::fs::read(&path).and_then(|c| Ok((c, std::fs::metadata(&path)?)));
    let (contents, mode) = match read {
        Ok((contents, metadata)) => (contents, mode_of(&metadata)),
        Err(e) => {
            let line = format!("\x01scp: {}: {}\n", path.display(), e);
            let _ = output.write_all(line.as_bytes()).await;
            return Ok(ExitStatus::from_code(1));
        }
    };
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    output
        .write_all(format!("C{:04o} {} {}\n", mode, contents.len(), name).as_bytes())
        .await?;
    if !expect_ack(&mut input).await {
        return protocol_error();
    }
    output.write_all(&contents).await?;
    output.write_all(&[0]).await?;
    if !expect_ack(&mut input).await {
        return protocol_error();
    }
    Ok(ExitStatus::from_code(0))
}

/// Transport that hands out one scripted stream, for exact byte checks
pub struct ScriptedTransport {
    script: Mutex<Option<(Mock, ExitStatus)>>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(mock: Mock, status: ExitStatus) -> Self {
        Self {
            script: Mutex::new(Some((mock, status))),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    async fn spawn(&self, command: &str) -> Result<RemoteProcess<'_>, ScpError> {
        self.commands.lock().unwrap().push(command.to_string());
        let (mock, status) = self
            .script
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ScpError::Session("script already used".to_string()))?;
        let (stdout, stdin) = tokio::io::split(mock);
        Ok(RemoteProcess::new(stdin, stdout, async move { Ok(status) }))
    }
}

pub fn client<T: Transport>(transport: T) -> ScpClient<T> {
    ScpClient::with_transport(
        transport,
        ScpClientConfig::new(16 * 1024, Some(Duration::from_secs(5))),
    )
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
