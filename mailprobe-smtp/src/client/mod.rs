//! Async SMTP client used by the session driver.
//!
//! The client speaks the wire protocol and nothing more: it returns every
//! server reply, including 4xx/5xx ones, and leaves judging them to the
//! caller. Transport failures and timeouts surface as [`ClientError`].
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use mailprobe_smtp::client::SmtpClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SmtpClient::connect("localhost", 2525, Duration::from_secs(10)).await?;
//! let greeting = client.read_greeting().await?;
//! let ehlo = client.ehlo("probe.example.com").await?;
//! assert!(greeting.is_success() && ehlo.is_success());
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod auth;
mod capabilities;
mod error;
mod message;
mod response;
mod smtp_client;

pub use auth::{Credentials, DEFAULT_MECHANISMS, Mechanism};
pub use capabilities::Capabilities;
pub use error::{ClientError, Result};
pub use message::{Mailbox, MessageBuilder, generate_message_id};
pub use response::{Response, ResponseLine};
pub use smtp_client::{AuthExchange, SmtpClient};
