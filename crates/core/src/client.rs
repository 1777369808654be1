//! Public client surface.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use zk_protocol::{Acl, CreateFlags, Stat};
use zk_runtime::{Dialer, HostSelector, TcpDialer};

use crate::config::{ClientConfig, ReplayPolicy};
use crate::ephemerals;
use crate::error::{Error, Result};
use crate::events::EventStream;
use crate::ops::{self, Operation};
use crate::reauth::{Credential, DefaultReauthenticator, Reauthenticator};
use crate::session::{SessionState, Shared};
use crate::watches::{self, WatchReceiver, WatchSpec};

/// Handle to one session. Cheap to clone; the session stops when
/// [`close`](Client::close) is called or the last clone is dropped.
#[derive(Clone)]
pub struct Client {
	inner: Arc<ClientInner>,
}

struct ClientInner {
	shared: Arc<Shared>,
}

impl Drop for ClientInner {
	fn drop(&mut self) {
		self.shared.detach();
	}
}

impl Client {
	/// Starts a session against `addresses` with the default configuration.
	///
	/// Returns as soon as the session task is running. Requests issued before
	/// the first connection completes wait in the outbound queue; the
	/// [`EventStream`] reports `Connected` once a server accepted the session.
	pub async fn connect<I, S>(addresses: I, session_timeout: Duration) -> Result<(Client, EventStream)>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self::builder().servers(addresses).session_timeout(session_timeout).connect().await
	}

	pub fn builder() -> ClientBuilder {
		ClientBuilder::new()
	}

	fn shared(&self) -> &Shared {
		&self.inner.shared
	}

	/// Closes the session. Idempotent, and bounded by the configured close
	/// timeout even when the server is unresponsive. Every outstanding request
	/// fails with [`Error::Closed`].
	pub async fn close(&self) {
		self.shared().close().await;
	}

	/// Registers a credential for this session and every future connection.
	///
	/// Adding a credential that is already registered does nothing.
	pub async fn add_auth(&self, scheme: &str, data: impl Into<Vec<u8>>) -> Result<()> {
		if scheme.is_empty() {
			return Err(Error::InvalidArgument("auth scheme must not be empty".into()));
		}
		self.shared().add_auth(Credential::new(scheme, data)).await
	}

	/// Issues `op` using the configured default request timeout.
	///
	/// A watch requested by `op` is still armed, but its notification only
	/// arrives on the [`EventStream`]; use the `*_w` methods for a receiver.
	pub async fn submit<O: Operation>(&self, op: O) -> Result<O::Output> {
		self.dispatch(&op, None, None).await
	}

	/// Issues `op` and gives up after `timeout`.
	pub async fn submit_with_timeout<O: Operation>(&self, op: O, timeout: Duration) -> Result<O::Output> {
		self.dispatch(&op, None, Some(timeout)).await
	}

	async fn submit_watched<O: Operation>(&self, op: O) -> Result<(O::Output, WatchReceiver)> {
		let Some((path, kind)) = op.watch() else {
			return Err(Error::InvalidArgument("operation does not set a watch".into()));
		};
		let (spec, receiver) = watches::channel(path, kind);
		let output = self.dispatch(&op, Some(spec), None).await?;
		Ok((output, receiver))
	}

	async fn dispatch<O: Operation>(&self, op: &O, watch: Option<WatchSpec>, timeout: Option<Duration>) -> Result<O::Output> {
		let mut payload = BytesMut::with_capacity(op.estimated_size());
		op.encode(&mut payload);
		let watch = watch.or_else(|| op.watch().map(|(path, kind)| WatchSpec::detached(path, kind)));

		match self.shared().call(op.opcode(), payload.freeze(), op.replay_safe(), watch, timeout).await {
			Ok(body) => op.decode(body),
			Err(Error::Operation(code)) => op.on_error(code),
			Err(err) => Err(err),
		}
	}

	/// Absolute paths of every ephemeral node whose path starts with `path`.
	pub async fn get_ephemerals(&self, path: &str) -> Result<Vec<String>> {
		ephemerals::get_ephemerals(self, path).await
	}

	/// Address of the server currently connected to.
	pub fn server(&self) -> Option<String> {
		self.shared().server()
	}

	pub fn state(&self) -> SessionState {
		self.shared().state()
	}

	/// Zero until the first handshake completes.
	pub fn session_id(&self) -> i64 {
		self.shared().session_id()
	}

	/// Forces the live connection to fail as if the network had dropped it.
	/// Returns `false` when there is no live connection.
	pub fn debug_kill_connection(&self) -> bool {
		self.shared().kill_connection()
	}

	pub async fn create(&self, path: &str, data: impl Into<Vec<u8>>, flags: CreateFlags, acl: Vec<Acl>) -> Result<String> {
		self.submit(ops::Create::new(path, data, flags, acl)?).await
	}

	/// Deletes `path` if its version matches; pass [`ops::ANY_VERSION`] to skip the check.
	pub async fn delete(&self, path: &str, version: i32) -> Result<()> {
		self.submit(ops::Delete::new(path, version)?).await
	}

	pub async fn exists(&self, path: &str) -> Result<Option<Stat>> {
		self.submit(ops::Exists::new(path)?).await
	}

	/// Like [`exists`](Client::exists), and fires on the next creation,
	/// change or deletion of `path`.
	pub async fn exists_w(&self, path: &str) -> Result<(Option<Stat>, WatchReceiver)> {
		self.submit_watched(ops::Exists::new(path)?.watched()).await
	}

	pub async fn get(&self, path: &str) -> Result<(Vec<u8>, Stat)> {
		self.submit(ops::GetData::new(path)?).await
	}

	pub async fn get_w(&self, path: &str) -> Result<(Vec<u8>, Stat, WatchReceiver)> {
		let ((data, stat), watch) = self.submit_watched(ops::GetData::new(path)?.watched()).await?;
		Ok((data, stat, watch))
	}

	pub async fn set(&self, path: &str, data: impl Into<Vec<u8>>, version: i32) -> Result<Stat> {
		self.submit(ops::SetData::new(path, data, version)?).await
	}

	pub async fn children(&self, path: &str) -> Result<Vec<String>> {
		self.submit(ops::GetChildren::new(path)?).await
	}

	pub async fn children_w(&self, path: &str) -> Result<(Vec<String>, WatchReceiver)> {
		self.submit_watched(ops::GetChildren::new(path)?.watched()).await
	}

	pub async fn children2(&self, path: &str) -> Result<(Vec<String>, Stat)> {
		self.submit(ops::GetChildren2::new(path)?).await
	}

	pub async fn get_acl(&self, path: &str) -> Result<(Vec<Acl>, Stat)> {
		self.submit(ops::GetAcl::new(path)?).await
	}

	pub async fn set_acl(&self, path: &str, acl: Vec<Acl>, version: i32) -> Result<Stat> {
		self.submit(ops::SetAcl::new(path, acl, version)?).await
	}

	pub async fn sync(&self, path: &str) -> Result<String> {
		self.submit(ops::SyncPath::new(path)?).await
	}
}

impl std::fmt::Debug for Client {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Client")
			.field("state", &self.state())
			.field("session_id", &format_args!("{:#x}", self.session_id()))
			.field("server", &self.server())
			.finish()
	}
}

/// Configures and starts a [`Client`].
pub struct ClientBuilder {
	config: ClientConfig,
	dialer: Option<Arc<dyn Dialer>>,
	reauthenticator: Option<Arc<dyn Reauthenticator>>,
}

impl ClientBuilder {
	pub fn new() -> Self {
		Self {
			config: ClientConfig::default(),
			dialer: None,
			reauthenticator: None,
		}
	}

	/// Replaces the whole configuration, server list included.
	pub fn config(mut self, config: ClientConfig) -> Self {
		self.config = config;
		self
	}

	pub fn servers<I, S>(mut self, addresses: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.config.servers = addresses.into_iter().map(Into::into).collect();
		self
	}

	pub fn session_timeout(mut self, timeout: Duration) -> Self {
		self.config.session_timeout = timeout;
		self
	}

	pub fn connect_timeout(mut self, timeout: Duration) -> Self {
		self.config.connect_timeout = timeout;
		self
	}

	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.config.request_timeout = Some(timeout);
		self
	}

	pub fn close_timeout(mut self, timeout: Duration) -> Self {
		self.config.close_timeout = timeout;
		self
	}

	pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
		self.config.backoff_initial = initial;
		self.config.backoff_max = max;
		self
	}

	pub fn send_queue_capacity(mut self, capacity: usize) -> Self {
		self.config.send_queue_capacity = capacity;
		self
	}

	pub fn event_capacity(mut self, capacity: usize) -> Self {
		self.config.event_capacity = capacity;
		self
	}

	pub fn max_frame_len(mut self, len: usize) -> Self {
		self.config.max_frame_len = len;
		self
	}

	pub fn shuffle_servers(mut self, shuffle: bool) -> Self {
		self.config.shuffle_servers = shuffle;
		self
	}

	pub fn replay_policy(mut self, policy: ReplayPolicy) -> Self {
		self.config.replay_policy = policy;
		self
	}

	/// Transport used to reach servers. Defaults to [`TcpDialer`].
	pub fn dialer(mut self, dialer: impl Dialer) -> Self {
		self.dialer = Some(Arc::new(dialer));
		self
	}

	/// Strategy run after every successful connection. Defaults to [`DefaultReauthenticator`].
	pub fn reauthenticator(mut self, reauthenticator: impl Reauthenticator) -> Self {
		self.reauthenticator = Some(Arc::new(reauthenticator));
		self
	}

	pub async fn connect(self) -> Result<(Client, EventStream)> {
		self.config.validate()?;
		let selector = HostSelector::new(&self.config.servers, self.config.shuffle_servers).map_err(|err| Error::InvalidArgument(err.to_string()))?;
		let dialer = self.dialer.unwrap_or_else(|| Arc::new(TcpDialer::new(self.config.max_frame_len)));
		let reauthenticator = self.reauthenticator.unwrap_or_else(|| Arc::new(DefaultReauthenticator));

		let (shared, events) = Shared::new(self.config, dialer, reauthenticator);
		shared.start(selector);
		let client = Client {
			inner: Arc::new(ClientInner { shared }),
		};
		Ok((client, events))
	}
}

impl Default for ClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}
