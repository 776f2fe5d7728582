//! Errors raised by the wire-level client.

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The relay sent something that is not a well-formed reply.
    #[error("Failed to parse reply: {0}")]
    Parse(String),

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
