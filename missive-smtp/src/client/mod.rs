//! Wire-level relay client.
//!
//! [`Client`] knows how to frame commands and parse replies over plain or
//! TLS connections. It has no notion of session state; that lives in
//! [`crate::session`].

mod capabilities;
mod connection;
mod error;
mod reply;

pub use capabilities::Capabilities;
pub use connection::{Client, dot_stuff};
pub use error::{ClientError, Result};
pub use reply::{Reply, ReplyLine};
