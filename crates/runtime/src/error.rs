use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),

	#[error("dialing {address} timed out after {timeout:?}")]
	DialTimeout { address: String, timeout: Duration },

	#[error("frame length {len} outside 0..={max}")]
	FrameLength { len: i64, max: usize },

	#[error("connection closed by peer")]
	Closed,

	#[error("connection killed")]
	Killed,

	#[error("no server addresses configured")]
	NoServers,

	#[error("invalid server address {0:?}")]
	InvalidAddress(String),
}

impl Error {
	/// Malformed framing, as opposed to the stream itself failing.
	pub fn is_protocol(&self) -> bool {
		matches!(self, Self::FrameLength { .. })
	}
}

pub type Result<T> = std::result::Result<T, Error>;
