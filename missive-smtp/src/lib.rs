//! Mail submission client.
//!
//! [`Mailer`] is the entry point: it validates the relay address up front,
//! opens a [`Session`] on demand, and sends [`Message`](missive_mime::Message)s
//! over it.
//!
//! ```no_run
//! use missive_mime::MessageBuilder;
//! use missive_smtp::Mailer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut mailer = Mailer::new("smtp.example.com:587", "alice", "secret")?;
//!
//! let message = MessageBuilder::new()
//!     .set_from("Alice", "alice@example.com")
//!     .add_to(["bob@example.org"])
//!     .set_subject("Lunch")
//!     .set_text("Noon?")
//!     .build()?;
//!
//! let receipt = mailer.send(&message).await?;
//! println!("{} accepted", receipt.message_id);
//! mailer.quit().await;
//! # Ok(())
//! # }
//! ```

mod address;
pub mod client;
mod credentials;
mod error;
mod mailer;
pub mod session;

pub use address::ServerAddress;
pub use credentials::Credentials;
pub use error::{ErrorKind, Result, SessionError, Stage};
pub use mailer::{Mailer, Transport};
pub use session::{Receipt, RecipientScope, Session, SessionConfig, State};
