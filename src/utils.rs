use std::fs::Metadata;
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use crate::error::ScpError;

/// Runs `operation`, failing with [`ScpError::Timeout`] once `limit` passes.
/// No limit means wait forever.
pub(crate) async fn bounded<T, F>(limit: Option<Duration>, operation: F) -> Result<T, ScpError>
where
    F: Future<Output = Result<T, ScpError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| ScpError::Timeout(limit))?,
        None => operation.await,
    }
}

/// Permission bits to announce for a local file
pub(crate) fn file_mode(metadata: &Metadata) -> u32 {
    metadata.permissions().mode() & 0o7777
}

/// Applies received permission bits to a local file
pub(crate) async fn set_file_mode(path: &Path, mode: u32) -> Result<(), ScpError> {
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))
        .await
        .map_err(|e| ScpError::local_io(path, e))
}

/// Splits a remote destination into the directory handed to `scp -t` and
/// the file name announced in the header.
///
/// A destination ending in `/` names a directory, the file keeps the
/// local name then. Remote paths are always `/` separated.
pub(crate) fn remote_target(
    destination: &str,
    local_path: &str,
) -> Result<(String, String), ScpError> {
    let local_name = || {
        Path::new(local_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ScpError::ProtocolFormat(format!("{local_path:?} has no file name"))
            })
    };

    if destination.is_empty() {
        return Ok((".".to_string(), local_name()?));
    }
    if destination.ends_with('/') {
        return Ok((destination.to_string(), local_name()?));
    }
    match destination.rsplit_once('/') {
        Some(("", name)) => Ok(("/".to_string(), name.to_string())),
        Some((dir, name)) => Ok((dir.to_string(), name.to_string())),
        None => Ok((".".to_string(), destination.to_string())),
    }
}
