//! Connection plumbing for the ZooKeeper client.
//!
//! This crate owns everything below the request layer:
//! * [`connection`]: length-prefixed frames over one byte stream
//! * [`transport`]: the [`Dialer`] seam and the TCP implementation
//! * [`selector`]: rotation over the configured ensemble members
//! * [`fake_transport`]: an in-memory dialer for unit tests

pub mod connection;
pub mod error;
pub mod fake_transport;
pub mod selector;
pub mod transport;

pub use connection::{DEFAULT_MAX_FRAME_LEN, FrameReader, FrameWriter, FramedConnection, KillSwitch};
pub use error::{Error, Result};
pub use selector::{Candidate, DEFAULT_PORT, HostSelector, ServerCandidate};
pub use transport::{DialFuture, Dialer, TcpDialer};
