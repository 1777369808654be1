use std::time::Duration;

use thiserror::Error;
use zk_protocol::{DecodeError, ErrorCode};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
	/// The socket failed. Handled by reconnecting; only surfaced from
	/// internal paths such as the handshake.
	#[error("transport error: {0}")]
	Transport(String),

	/// A frame or record could not be decoded.
	#[error("protocol error: {0}")]
	Protocol(String),

	/// The server refused to resume the session; ephemeral nodes and watches are gone.
	#[error("session expired")]
	SessionExpired,

	#[error("authentication failed")]
	AuthFailed,

	/// The server answered the request with an error code.
	#[error("server error: {0}")]
	Operation(ErrorCode),

	#[error("request timed out after {0:?}")]
	Timeout(Duration),

	#[error("connection closed")]
	Closed,

	/// The connection dropped after the request was sent and the request is
	/// not safe to resend, so its outcome is unknown.
	#[error("connection lost before the request completed")]
	ConnectionLoss,

	#[error("invalid argument: {0}")]
	InvalidArgument(String),
}

impl Error {
	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout(_))
	}

	/// The server error code, when the server rejected the request.
	pub fn code(&self) -> Option<ErrorCode> {
		match self {
			Self::Operation(code) => Some(*code),
			_ => None,
		}
	}

	pub fn is_no_node(&self) -> bool {
		self.code() == Some(ErrorCode::NoNode)
	}
}

impl From<zk_runtime::Error> for Error {
	fn from(err: zk_runtime::Error) -> Self {
		if err.is_protocol() { Self::Protocol(err.to_string()) } else { Self::Transport(err.to_string()) }
	}
}

impl From<DecodeError> for Error {
	fn from(err: DecodeError) -> Self {
		Self::Protocol(err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn framing_errors_map_to_protocol() {
		let err: Error = zk_runtime::Error::FrameLength { len: -1, max: 10 }.into();
		assert!(matches!(err, Error::Protocol(_)));

		let err: Error = zk_runtime::Error::Closed.into();
		assert_eq!(err, Error::Transport("connection closed by peer".to_string()));
	}

	#[test]
	fn operation_errors_expose_their_code() {
		let err = Error::Operation(ErrorCode::NoNode);
		assert!(err.is_no_node());
		assert_eq!(err.code(), Some(ErrorCode::NoNode));
		assert_eq!(Error::Closed.code(), None);
		assert!(Error::Timeout(Duration::from_secs(1)).is_timeout());
	}
}
