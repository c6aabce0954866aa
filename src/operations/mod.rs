/// Module for downloading files from remote server
pub(crate) mod download;

/// Module for running commands on remote server
pub(crate) mod exec;

/// Module for uploading files to remote server
pub(crate) mod upload;
