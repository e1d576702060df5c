//! The SMTP probe: an async client, the staged session driver built on it,
//! and the two ways of delivering its progress.
//!
//! ```no_run
//! use mailprobe_smtp::{Probe, parse_request};
//!
//! # async fn example(body: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! let config = parse_request(body)?;
//! let result = Probe::new(config).run_buffered().await;
//! println!("{}: {}ms", result.status, result.total_duration);
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod client;
pub mod emitter;
pub mod error;
pub mod observer;
pub mod options;
pub mod probe;
pub mod request;

pub use emitter::{Buffered, ProbeEvent, ProgressEmitter, Streaming};
pub use error::{Failure, ProbeError};
pub use observer::ProbeObserver;
pub use options::{DEFAULT_HELO_NAME, SessionOptions, TlsMode};
pub use probe::{Probe, unexpected_result};
pub use request::{RequestError, parse_request};
