//! Credential replay after each successful connection.
//!
//! The server forgets authentication when a connection drops, even though the
//! session survives. After every handshake the session hands the current
//! credential list to a [`Reauthenticator`], exactly once per connection
//! generation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::session::Shared;

/// An `add_auth` credential, e.g. scheme `digest` with data `user:password`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential {
	pub scheme: String,
	pub data: Vec<u8>,
}

impl Credential {
	pub fn new(scheme: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
		Self {
			scheme: scheme.into(),
			data: data.into(),
		}
	}
}

impl std::fmt::Debug for Credential {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Credential")
			.field("scheme", &self.scheme)
			.field("data", &format_args!("<{} bytes>", self.data.len()))
			.finish()
	}
}

pub type ReauthFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Restores authentication on a fresh connection.
pub trait Reauthenticator: Send + Sync + 'static {
	fn reauthenticate<'a>(&'a self, ctx: &'a ReauthContext) -> ReauthFuture<'a>;
}

/// What a [`Reauthenticator`] sees of the connection it runs for.
pub struct ReauthContext {
	shared: Arc<Shared>,
	generation: u64,
	server: String,
	credentials: Vec<Credential>,
}

impl ReauthContext {
	/// Counter of successful handshakes; identifies this connection.
	pub fn generation(&self) -> u64 {
		self.generation
	}

	pub fn server(&self) -> &str {
		&self.server
	}

	/// Credentials registered so far, in the order they were added.
	pub fn credentials(&self) -> &[Credential] {
		&self.credentials
	}

	/// Sends one auth packet ahead of queued requests and waits for the reply.
	///
	/// Fails with [`Error::ConnectionLoss`] if this connection is no longer
	/// current, and with [`Error::AuthFailed`] if the server rejects it.
	pub async fn send_auth(&self, credential: &Credential) -> Result<()> {
		let reply = self.shared.queue_auth(Some(self.generation), credential)?;
		reply.await.unwrap_or(Err(Error::ConnectionLoss))
	}
}

/// Sends every credential in insertion order.
///
/// A rejected credential does not stop the others from being sent; the
/// rejection is reported once all have been tried.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultReauthenticator;

impl Reauthenticator for DefaultReauthenticator {
	fn reauthenticate<'a>(&'a self, ctx: &'a ReauthContext) -> ReauthFuture<'a> {
		Box::pin(async move {
			let mut rejected = false;
			for credential in ctx.credentials() {
				match ctx.send_auth(credential).await {
					Ok(()) => {}
					Err(Error::AuthFailed) => {
						warn!(target = "zk.session", scheme = %credential.scheme, server = %ctx.server(), "credential rejected during re-authentication");
						rejected = true;
					}
					Err(err) => return Err(err),
				}
			}
			if rejected { Err(Error::AuthFailed) } else { Ok(()) }
		})
	}
}

/// Runs the configured strategy for one connection generation in the background.
pub(crate) fn spawn(shared: Arc<Shared>, generation: u64, server: String, credentials: Vec<Credential>) {
	tokio::spawn(async move {
		let strategy = Arc::clone(&shared.reauth);
		let ctx = ReauthContext {
			shared,
			generation,
			server,
			credentials,
		};
		match strategy.reauthenticate(&ctx).await {
			Ok(()) => debug!(target = "zk.session", generation, credentials = ctx.credentials.len(), "re-authentication complete"),
			// Each rejected packet was already reported by the receive loop.
			Err(Error::AuthFailed) => debug!(target = "zk.session", generation, "re-authentication finished with rejected credentials"),
			Err(err) => debug!(target = "zk.session", generation, error = %err, "re-authentication interrupted"),
		}
	});
}
