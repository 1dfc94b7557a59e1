use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum WiscatError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    #[diagnostic(help("see `wiscat --help` for the expected argument formats"))]
    InvalidArgument(String),

    #[error("{}", remote_message(.status, .message))]
    RemoteUnavailable {
        status: Option<u16>,
        message: String,
    },

    #[error("failed to parse catalogue response: {0}")]
    ResponseParse(String),

    #[error("invalid bundle archive: {0}")]
    Archive(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),
}

impl WiscatError {
    pub fn remote(message: impl Into<String>) -> Self {
        WiscatError::RemoteUnavailable {
            status: None,
            message: message.into(),
        }
    }
}

fn remote_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(status) => format!("catalogue returned status {status}: {message}"),
        None => format!("catalogue request failed: {message}"),
    }
}
