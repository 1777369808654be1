//! Fake dialer for unit testing the request and session layers without sockets.
//!
//! Every successful dial creates an in-memory duplex pipe. The client half is
//! returned to the caller; the server half is handed to the test through the
//! [`FakeTransportController`], which plays the server.
//!
//! # Example
//!
//! ```ignore
//! let (dialer, mut controller) = FakeTransportBuilder::new().build();
//! let client = Client::builder().servers(["a:1"]).dialer(dialer).connect()?;
//!
//! let mut peer = controller.accept().await.unwrap();
//! let handshake = peer.conn.read().await?;
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::connection::{DEFAULT_MAX_FRAME_LEN, FramedConnection};
use crate::transport::{DialFuture, Dialer};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Builder for creating fake transport instances.
pub struct FakeTransportBuilder {
	max_frame_len: usize,
}

impl FakeTransportBuilder {
	pub fn new() -> Self {
		Self {
			max_frame_len: DEFAULT_MAX_FRAME_LEN,
		}
	}

	pub fn max_frame_len(mut self, max_frame_len: usize) -> Self {
		self.max_frame_len = max_frame_len;
		self
	}

	/// Build the dialer and the controller that receives the server ends.
	pub fn build(self) -> (FakeDialer, FakeTransportController) {
		let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
		let shared = Arc::new(Mutex::new(FakeState::default()));

		let dialer = FakeDialer {
			shared: Arc::clone(&shared),
			accepted_tx,
			max_frame_len: self.max_frame_len,
		};
		let controller = FakeTransportController { shared, accepted_rx };
		(dialer, controller)
	}
}

impl Default for FakeTransportBuilder {
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Default)]
struct FakeState {
	refused: HashSet<String>,
	dialed: Vec<String>,
}

/// Server end of one fake connection.
pub struct FakePeer {
	/// Address the client dialed.
	pub address: String,
	pub conn: FramedConnection,
}

pub struct FakeDialer {
	shared: Arc<Mutex<FakeState>>,
	accepted_tx: mpsc::UnboundedSender<FakePeer>,
	max_frame_len: usize,
}

impl Dialer for FakeDialer {
	fn dial<'a>(&'a self, address: &'a str, _timeout: Duration) -> DialFuture<'a> {
		Box::pin(async move {
			{
				let mut state = self.shared.lock();
				state.dialed.push(address.to_string());
				if state.refused.contains(address) {
					return Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, format!("{address} refused")).into());
				}
			}

			let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
			let peer = FakePeer {
				address: address.to_string(),
				conn: FramedConnection::new(server, "fake-client", self.max_frame_len),
			};
			if self.accepted_tx.send(peer).is_err() {
				return Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "fake transport controller dropped").into());
			}
			Ok(FramedConnection::new(client, address, self.max_frame_len))
		})
	}
}

/// Plays the server side of fake connections.
pub struct FakeTransportController {
	shared: Arc<Mutex<FakeState>>,
	accepted_rx: mpsc::UnboundedReceiver<FakePeer>,
}

impl FakeTransportController {
	/// Waits for the client's next successful dial.
	pub async fn accept(&mut self) -> Option<FakePeer> {
		self.accepted_rx.recv().await
	}

	/// Makes future dials to `address` fail.
	pub fn refuse(&self, address: &str) {
		self.shared.lock().refused.insert(address.to_string());
	}

	pub fn allow(&self, address: &str) {
		self.shared.lock().refused.remove(address);
	}

	/// Every address dialed so far, in order, including refused ones.
	pub fn dialed(&self) -> Vec<String> {
		self.shared.lock().dialed.clone()
	}
}
