use thiserror::Error;
use zk_protocol::DecodeError;

#[derive(Debug, Error)]
pub enum Error {
	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Transport(#[from] zk_runtime::Error),

	#[error("malformed request: {0}")]
	Decode(#[from] DecodeError),

	#[error("no server with index {0}")]
	UnknownServer(usize),

	#[error("server {0} is already running")]
	AlreadyRunning(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
