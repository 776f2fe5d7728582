//! Session-level errors.

use core::fmt::{self, Display};
use std::time::Duration;

use missive_mime::MimeError;
use thiserror::Error;

use crate::{client::ClientError, session::State};

/// The six broad failure classes a caller can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input: address, message, or calling an operation in the wrong state.
    Validation,
    /// An attachment could not be read.
    Io,
    /// Transport, greeting or timeout failures.
    Connection,
    /// The TLS upgrade was required or attempted and did not succeed.
    Security,
    /// Credentials were rejected, or could not be sent safely.
    Auth,
    /// The relay rejected the sender, a recipient, or the data.
    Transaction,
}

/// The step of a transaction the relay rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    MailFrom,
    RcptTo,
    Data,
    /// The reply after the payload was transferred.
    DataEnd,
}

impl Display for Stage {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::MailFrom => "MAIL FROM",
            Self::RcptTo => "RCPT TO",
            Self::Data => "DATA",
            Self::DataEnd => "end of data",
        })
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Envelope(#[from] MimeError),

    /// The relay could not be reached or refused to talk.
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("TLS negotiation failed: {0}")]
    Security(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("{stage} rejected with {code}: {message}")]
    Transaction {
        stage: Stage,
        code: u16,
        message: String,
    },

    #[error("Cannot {operation} while the session is {state}")]
    InvalidState {
        state: State,
        operation: &'static str,
    },

    #[error("{step} timed out after {after:?}")]
    Timeout { step: &'static str, after: Duration },
}

impl SessionError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::InvalidState { .. }
            | Self::Envelope(MimeError::Validation(_)) => ErrorKind::Validation,
            Self::Envelope(_) => ErrorKind::Io,
            Self::Client(ClientError::Tls(_)) | Self::Security(_) => ErrorKind::Security,
            Self::Connection(_) | Self::Client(_) | Self::Timeout { .. } => ErrorKind::Connection,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Transaction { .. } => ErrorKind::Transaction,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
