//! Configuration shared by every missive crate.
//!
//! - [`timeouts`]: per-step bounds for a relay conversation
//! - [`tls`]: when to encrypt, and how the relay's certificate is checked

pub mod timeouts;
pub mod tls;

pub use timeouts::ClientTimeouts;
pub use tls::{TlsConfig, TlsPolicy};
