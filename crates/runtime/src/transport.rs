//! Transport seam: how a [`FramedConnection`] to one server is obtained.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::connection::{DEFAULT_MAX_FRAME_LEN, FramedConnection};
use crate::error::{Error, Result};

pub type DialFuture<'a> = Pin<Box<dyn Future<Output = Result<FramedConnection>> + Send + 'a>>;

/// Opens framed connections to ensemble members.
///
/// Implementations must give up once `timeout` has elapsed.
pub trait Dialer: Send + Sync + 'static {
	fn dial<'a>(&'a self, address: &'a str, timeout: Duration) -> DialFuture<'a>;
}

/// Plain TCP dialer.
#[derive(Debug, Clone)]
pub struct TcpDialer {
	max_frame_len: usize,
}

impl TcpDialer {
	pub fn new(max_frame_len: usize) -> Self {
		Self { max_frame_len }
	}
}

impl Default for TcpDialer {
	fn default() -> Self {
		Self::new(DEFAULT_MAX_FRAME_LEN)
	}
}

impl Dialer for TcpDialer {
	fn dial<'a>(&'a self, address: &'a str, timeout: Duration) -> DialFuture<'a> {
		Box::pin(async move {
			let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
				.await
				.map_err(|_| Error::DialTimeout {
					address: address.to_string(),
					timeout,
				})??;
			stream.set_nodelay(true)?;
			debug!(target = "zk.conn", %address, "tcp connection established");

			let (read, write) = stream.into_split();
			Ok(FramedConnection::from_parts(read, write, address, self.max_frame_len))
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::io::{AsyncReadExt, AsyncWriteExt};
	use tokio::net::TcpListener;

	#[tokio::test]
	async fn tcp_dialer_exchanges_frames() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap().to_string();

		let server = tokio::spawn(async move {
			let (mut stream, _) = listener.accept().await.unwrap();
			let mut prefix = [0u8; 4];
			stream.read_exact(&mut prefix).await.unwrap();
			let mut body = vec![0u8; i32::from_be_bytes(prefix) as usize];
			stream.read_exact(&mut body).await.unwrap();
			assert_eq!(body, b"ping");

			stream.write_all(&4i32.to_be_bytes()).await.unwrap();
			stream.write_all(b"pong").await.unwrap();
		});

		let mut conn = TcpDialer::default().dial(&addr, Duration::from_secs(1)).await.unwrap();
		assert_eq!(conn.peer(), addr);
		conn.write(b"ping").await.unwrap();
		assert_eq!(&conn.read().await.unwrap()[..], b"pong");

		server.await.unwrap();
	}

	#[tokio::test]
	async fn dialing_a_closed_port_fails() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap().to_string();
		drop(listener);

		let result = TcpDialer::default().dial(&addr, Duration::from_secs(1)).await;
		assert!(result.is_err());
	}
}
