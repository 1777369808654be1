//! Length-prefixed framing over one byte stream.
//!
//! Every frame is a big-endian `i32` length followed by that many bytes:
//!
//! ```text
//! +----------------+---------------------------+
//! | len (i32, BE)  | payload (len bytes)       |
//! +----------------+---------------------------+
//! ```
//!
//! A [`FramedConnection`] splits into a [`FrameReader`] and a [`FrameWriter`]
//! so the receive and send loops can run at the same time. Any error from
//! either half is terminal for the connection; the owner must dial again.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::trace;

use crate::error::{Error, Result};

/// Largest frame accepted unless configured otherwise (4 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Forces the read half of one connection to fail.
///
/// The reader then reports [`Error::Killed`], which callers handle exactly like
/// any other transport failure. Used to inject server loss in tests.
#[derive(Debug, Clone)]
pub struct KillSwitch {
	tx: std::sync::Arc<watch::Sender<bool>>,
}

impl KillSwitch {
	fn new() -> (Self, watch::Receiver<bool>) {
		let (tx, rx) = watch::channel(false);
		(Self { tx: std::sync::Arc::new(tx) }, rx)
	}

	pub fn kill(&self) {
		self.tx.send_replace(true);
	}

	pub fn is_killed(&self) -> bool {
		*self.tx.borrow()
	}
}

/// One live connection to one server.
pub struct FramedConnection {
	reader: FrameReader,
	writer: FrameWriter,
}

impl FramedConnection {
	/// Wraps a duplex stream.
	pub fn new<S>(stream: S, peer: impl Into<String>, max_frame_len: usize) -> Self
	where
		S: AsyncRead + AsyncWrite + Send + 'static,
	{
		let (read, write) = tokio::io::split(stream);
		Self::from_parts(read, write, peer, max_frame_len)
	}

	/// Wraps already-separated read and write halves.
	pub fn from_parts<R, W>(read: R, write: W, peer: impl Into<String>, max_frame_len: usize) -> Self
	where
		R: AsyncRead + Send + Unpin + 'static,
		W: AsyncWrite + Send + Unpin + 'static,
	{
		let peer = peer.into();
		let (kill, killed) = KillSwitch::new();
		Self {
			reader: FrameReader {
				inner: Box::new(read),
				peer: peer.clone(),
				max_frame_len,
				kill,
				killed,
			},
			writer: FrameWriter {
				inner: Box::new(write),
				peer,
				max_frame_len,
				scratch: BytesMut::new(),
			},
		}
	}

	pub fn peer(&self) -> &str {
		&self.reader.peer
	}

	pub fn kill_switch(&self) -> KillSwitch {
		self.reader.kill.clone()
	}

	pub async fn write(&mut self, frame: &[u8]) -> Result<()> {
		self.writer.write(frame).await
	}

	pub async fn read(&mut self) -> Result<Bytes> {
		self.reader.read().await
	}

	pub async fn close(self) {
		self.writer.close().await;
	}

	pub fn into_split(self) -> (FrameReader, FrameWriter) {
		(self.reader, self.writer)
	}
}

impl std::fmt::Debug for FramedConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FramedConnection").field("peer", &self.reader.peer).finish_non_exhaustive()
	}
}

pub struct FrameReader {
	inner: BoxedRead,
	peer: String,
	max_frame_len: usize,
	kill: KillSwitch,
	killed: watch::Receiver<bool>,
}

impl FrameReader {
	pub fn peer(&self) -> &str {
		&self.peer
	}

	pub fn kill_switch(&self) -> KillSwitch {
		self.kill.clone()
	}

	/// Reads one whole frame.
	///
	/// Returns [`Error::Closed`] on a clean end of stream and
	/// [`Error::Killed`] once the kill switch has been thrown.
	pub async fn read(&mut self) -> Result<Bytes> {
		if *self.killed.borrow() {
			return Err(Error::Killed);
		}
		tokio::select! {
			biased;
			_ = wait_killed(&mut self.killed) => Err(Error::Killed),
			frame = read_frame(&mut self.inner, self.max_frame_len) => {
				if let Ok(frame) = &frame {
					trace!(target = "zk.conn", peer = %self.peer, len = frame.len(), "frame received");
				}
				frame
			}
		}
	}
}

pub struct FrameWriter {
	inner: BoxedWrite,
	peer: String,
	max_frame_len: usize,
	scratch: BytesMut,
}

impl FrameWriter {
	pub fn peer(&self) -> &str {
		&self.peer
	}

	/// Writes the length prefix and `frame` as one buffer, then flushes.
	///
	/// A frame the peer would refuse fails with [`Error::FrameLength`] before
	/// anything reaches the stream.
	pub async fn write(&mut self, frame: &[u8]) -> Result<()> {
		let len = match i32::try_from(frame.len()) {
			Ok(len) if frame.len() <= self.max_frame_len => len,
			_ => {
				return Err(Error::FrameLength {
					len: i64::try_from(frame.len()).unwrap_or(i64::MAX),
					max: self.max_frame_len,
				});
			}
		};
		self.scratch.clear();
		self.scratch.reserve(LEN_PREFIX + frame.len());
		self.scratch.put_i32(len);
		self.scratch.put_slice(frame);
		self.inner.write_all(&self.scratch).await?;
		self.inner.flush().await?;
		trace!(target = "zk.conn", peer = %self.peer, len = frame.len(), "frame sent");
		Ok(())
	}

	pub async fn close(mut self) {
		let _ = self.inner.shutdown().await;
	}
}

async fn wait_killed(killed: &mut watch::Receiver<bool>) {
	if killed.wait_for(|killed| *killed).await.is_err() {
		std::future::pending::<()>().await;
	}
}

async fn read_frame(reader: &mut BoxedRead, max_frame_len: usize) -> Result<Bytes> {
	let mut prefix = [0u8; LEN_PREFIX];
	reader.read_exact(&mut prefix).await.map_err(eof_as_closed)?;

	let len = i32::from_be_bytes(prefix);
	if len < 0 || len as usize > max_frame_len {
		return Err(Error::FrameLength {
			len: i64::from(len),
			max: max_frame_len,
		});
	}

	let mut body = BytesMut::zeroed(len as usize);
	reader.read_exact(&mut body).await.map_err(eof_as_closed)?;
	Ok(body.freeze())
}

fn eof_as_closed(err: std::io::Error) -> Error {
	if err.kind() == std::io::ErrorKind::UnexpectedEof {
		Error::Closed
	} else {
		Error::Io(err)
	}
}
