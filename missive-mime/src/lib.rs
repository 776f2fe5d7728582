//! Message model and envelope serialisation.
//!
//! A [`MessageBuilder`] is filled in incrementally and frozen into an
//! immutable [`Message`]. The [`EnvelopeBuilder`] turns a `Message` into the
//! exact bytes transmitted during the data phase of a relay transaction:
//!
//! ```
//! use missive_mime::{EnvelopeBuilder, MessageBuilder, Shape};
//!
//! # fn main() -> Result<(), missive_mime::MimeError> {
//! let message = MessageBuilder::new()
//!     .set_from("Alice", "a@x.com")
//!     .add_to(["b@y.com"])
//!     .set_text("hi")
//!     .build()?;
//!
//! let envelope = EnvelopeBuilder::with_hostname("client.example").build(&message)?;
//! assert_eq!(envelope.shape(), Shape::Plain);
//! assert!(envelope.boundary().is_none());
//! # Ok(())
//! # }
//! ```

mod attachment;
pub mod encoding;
mod envelope;
mod error;
mod message;

pub use attachment::{Attachment, AttachmentResolver, DEFAULT_CONTENT_TYPE};
pub use envelope::{Envelope, EnvelopeBuilder, Shape};
pub use error::{MimeError, Result};
pub use message::{DEFAULT_SUBJECT, Mailbox, Message, MessageBuilder};
