//! Session lifecycle: connect, resume, tear down and close.
//!
//! One background task owns the connection. It dials candidates from the
//! [`HostSelector`], performs the handshake, runs the send and receive loops
//! until the connection fails, then recovers and goes round again. Everything
//! the loops and the callers share lives in [`SessionCore`] behind a single
//! mutex that is never held across an `.await`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zk_protocol::{AUTH_XID, AuthPacket, ConnectRequest, ConnectResponse, Decode, Encode, OpCode, SET_WATCHES_XID};
use zk_runtime::{Dialer, FramedConnection, HostSelector, KillSwitch};

use crate::config::{ClientConfig, ReplayPolicy};
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventStream, SessionEvent};
use crate::multiplexer;
use crate::pending::{InFlightTable, Outbound, Request};
use crate::reauth::{self, Credential, Reauthenticator};
use crate::watches::{WatchRegistry, WatchSpec};

/// Floor for the keep-alive, read-idle and backoff intervals.
const MIN_TICK: Duration = Duration::from_millis(10);
/// xid and opcode ahead of every request body.
const REQUEST_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
	/// Created, nothing dialed yet.
	Disconnected,
	Connecting,
	Connected,
	/// Lost a connection and looking for the next one.
	Reconnecting,
	/// The server rejected the session's credentials. Terminal.
	AuthFailed,
	Closed,
}

impl SessionState {
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::AuthFailed | Self::Closed)
	}

	pub fn is_connected(self) -> bool {
		self == Self::Connected
	}
}

pub(crate) struct SessionCore {
	pub state: SessionState,
	pub session_id: i64,
	pub password: Vec<u8>,
	pub negotiated_timeout: Duration,
	pub last_zxid: i64,
	pub server: Option<String>,
	/// Successful handshakes so far.
	pub generation: u64,
	reauth_generation: u64,
	pub pings_outstanding: u32,
	pub in_flight: InFlightTable,
	pub priority: VecDeque<Outbound>,
	/// Requests from a dead connection, oldest first.
	pub replay: VecDeque<Request>,
	pub credentials: Vec<Credential>,
	/// Callers waiting for auth replies, in send order.
	pub auth_waiters: VecDeque<oneshot::Sender<Result<()>>>,
	pub watches: WatchRegistry,
	pub kill: Option<KillSwitch>,
}

impl SessionCore {
	fn new() -> Self {
		Self {
			state: SessionState::Disconnected,
			session_id: 0,
			password: Vec::new(),
			negotiated_timeout: Duration::ZERO,
			last_zxid: 0,
			server: None,
			generation: 0,
			reauth_generation: 0,
			pings_outstanding: 0,
			in_flight: InFlightTable::new(),
			priority: VecDeque::new(),
			replay: VecDeque::new(),
			credentials: Vec::new(),
			auth_waiters: VecDeque::new(),
			watches: WatchRegistry::default(),
			kill: None,
		}
	}

	fn terminal_error(&self) -> Error {
		match self.state {
			SessionState::AuthFailed => Error::AuthFailed,
			_ => Error::Closed,
		}
	}

	fn push_auth(&mut self, credential: &Credential) -> oneshot::Receiver<Result<()>> {
		let mut payload = BytesMut::new();
		AuthPacket {
			auth_type: 0,
			scheme: credential.scheme.clone(),
			auth: credential.data.clone(),
		}
		.encode(&mut payload);

		let (tx, rx) = oneshot::channel();
		self.priority.push_back(Outbound::Control {
			xid: AUTH_XID,
			opcode: OpCode::Auth,
			payload: payload.freeze(),
		});
		self.auth_waiters.push_back(tx);
		rx
	}
}

/// Everything in a [`SessionCore`] that still expects an answer.
struct Outstanding {
	requests: Vec<Request>,
	auth_waiters: Vec<oneshot::Sender<Result<()>>>,
	watches: WatchRegistry,
}

impl Outstanding {
	fn take(core: &mut SessionCore) -> Self {
		let mut requests = core.in_flight.drain();
		requests.extend(core.replay.drain(..));
		requests.extend(core.priority.drain(..).filter_map(|outbound| match outbound {
			Outbound::Request(request) => Some(request),
			Outbound::Control { .. } => None,
		}));
		Self {
			requests,
			auth_waiters: core.auth_waiters.drain(..).collect(),
			watches: std::mem::take(&mut core.watches),
		}
	}

	fn fail(mut self, err: &Error) {
		for request in self.requests {
			request.fail(err.clone());
		}
		for waiter in self.auth_waiters {
			let _ = waiter.send(Err(err.clone()));
		}
		self.watches.fail_all(err);
	}
}

/// Negotiated timings for one live connection.
struct Link {
	ping_interval: Duration,
	read_timeout: Duration,
}

/// Capped exponential delay between full passes over the ensemble.
#[derive(Debug)]
struct Backoff {
	initial: Duration,
	max: Duration,
	current: Duration,
}

impl Backoff {
	fn new(initial: Duration, max: Duration) -> Self {
		let initial = initial.max(MIN_TICK);
		Self {
			initial,
			max: max.max(initial),
			current: initial,
		}
	}

	fn next_delay(&mut self) -> Duration {
		let delay = self.current;
		self.current = self.current.saturating_mul(2).min(self.max);
		delay
	}

	fn reset(&mut self) {
		self.current = self.initial;
	}
}

/// Resolves once `stop` is raised or its sender is gone.
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
	let _ = stop.wait_for(|stopped| *stopped).await;
}

pub(crate) struct Shared {
	pub config: ClientConfig,
	pub core: Mutex<SessionCore>,
	queue_tx: mpsc::Sender<Request>,
	pub queue_rx: tokio::sync::Mutex<mpsc::Receiver<Request>>,
	/// Raised when the priority lane or replay buffer gains work.
	pub wake: Notify,
	pub events: EventDispatcher,
	stop: watch::Sender<bool>,
	pub reauth: Arc<dyn Reauthenticator>,
	dialer: Arc<dyn Dialer>,
	tickets: AtomicU64,
	task: Mutex<Option<JoinHandle<()>>>,
	closed_published: AtomicBool,
}

impl Shared {
	pub(crate) fn new(config: ClientConfig, dialer: Arc<dyn Dialer>, reauth: Arc<dyn Reauthenticator>) -> (Arc<Self>, EventStream) {
		let (queue_tx, queue_rx) = mpsc::channel(config.send_queue_capacity);
		let (events, stream) = EventDispatcher::new(config.event_capacity);
		let (stop, _) = watch::channel(false);
		let shared = Arc::new(Self {
			config,
			core: Mutex::new(SessionCore::new()),
			queue_tx,
			queue_rx: tokio::sync::Mutex::new(queue_rx),
			wake: Notify::new(),
			events,
			stop,
			reauth,
			dialer,
			tickets: AtomicU64::new(1),
			task: Mutex::new(None),
			closed_published: AtomicBool::new(false),
		});
		(shared, stream)
	}

	/// Spawns the session task.
	pub(crate) fn start(self: &Arc<Self>, selector: HostSelector) {
		let handle = tokio::spawn(Arc::clone(self).run(selector));
		*self.task.lock() = Some(handle);
	}

	pub(crate) fn state(&self) -> SessionState {
		self.core.lock().state
	}

	pub(crate) fn session_id(&self) -> i64 {
		self.core.lock().session_id
	}

	pub(crate) fn server(&self) -> Option<String> {
		self.core.lock().server.clone()
	}

	fn terminal_error(&self) -> Error {
		self.core.lock().terminal_error()
	}

	fn check_usable(&self) -> Result<()> {
		let core = self.core.lock();
		if core.state.is_terminal() { Err(core.terminal_error()) } else { Ok(()) }
	}

	/// Issues one request and waits for its reply body.
	///
	/// `timeout` overrides the configured default request timeout. On expiry
	/// the request is forgotten, so a late reply is discarded.
	pub(crate) async fn call(&self, opcode: OpCode, payload: Bytes, replay_safe: bool, watch: Option<WatchSpec>, timeout: Option<Duration>) -> Result<Bytes> {
		self.check_usable()?;
		if payload.len() + REQUEST_HEADER_LEN > self.config.max_frame_len {
			return Err(Error::InvalidArgument(format!(
				"request of {} bytes exceeds the {} byte frame limit",
				payload.len() + REQUEST_HEADER_LEN,
				self.config.max_frame_len
			)));
		}
		let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
		let (request, reply) = Request::new(ticket, opcode, payload, replay_safe, watch);
		let exchange = self.exchange(request, reply);

		let Some(limit) = timeout.or(self.config.request_timeout) else {
			return exchange.await;
		};
		match tokio::time::timeout(limit, exchange).await {
			Ok(result) => result,
			Err(_) => {
				self.abandon(ticket);
				debug!(target = "zk.mux", ticket, ?opcode, ?limit, "request timed out");
				Err(Error::Timeout(limit))
			}
		}
	}

	async fn exchange(&self, request: Request, reply: oneshot::Receiver<Result<Bytes>>) -> Result<Bytes> {
		let mut stop = self.stop.subscribe();
		tokio::select! {
			biased;
			_ = stopped(&mut stop) => return Err(self.terminal_error()),
			sent = self.queue_tx.send(request) => {
				if sent.is_err() {
					return Err(self.terminal_error());
				}
			}
		}
		tokio::select! {
			biased;
			reply = reply => reply.unwrap_or_else(|_| Err(self.terminal_error())),
			_ = stopped(&mut stop) => Err(self.terminal_error()),
		}
	}

	fn abandon(&self, ticket: u64) {
		let mut core = self.core.lock();
		if core.in_flight.abandon(ticket).is_none() {
			core.replay.retain(|request| request.ticket != ticket);
		}
	}

	/// Queues an auth packet on the current connection.
	///
	/// With `generation` set, fails with [`Error::ConnectionLoss`] unless that
	/// connection is still the live one.
	pub(crate) fn queue_auth(&self, generation: Option<u64>, credential: &Credential) -> Result<oneshot::Receiver<Result<()>>> {
		let reply = {
			let mut core = self.core.lock();
			if core.state.is_terminal() {
				return Err(core.terminal_error());
			}
			if !core.state.is_connected() || generation.is_some_and(|generation| generation != core.generation) {
				return Err(Error::ConnectionLoss);
			}
			core.push_auth(credential)
		};
		self.wake.notify_one();
		Ok(reply)
	}

	pub(crate) async fn add_auth(&self, credential: Credential) -> Result<()> {
		let reply = {
			let mut core = self.core.lock();
			if core.state.is_terminal() {
				return Err(core.terminal_error());
			}
			if core.credentials.contains(&credential) {
				debug!(target = "zk.session", scheme = %credential.scheme, "credential already registered");
				return Ok(());
			}
			core.credentials.push(credential.clone());
			core.state.is_connected().then(|| core.push_auth(&credential))
		};
		let Some(reply) = reply else {
			debug!(target = "zk.session", scheme = %credential.scheme, "credential stored for the next connection");
			return Ok(());
		};
		self.wake.notify_one();

		let reply = match self.config.request_timeout {
			Some(limit) => match tokio::time::timeout(limit, reply).await {
				Ok(reply) => reply,
				Err(_) => {
					debug!(target = "zk.session", scheme = %credential.scheme, ?limit, "no auth reply yet, credential kept for replay");
					return Ok(());
				}
			},
			None => reply.await,
		};
		match reply {
			Ok(Ok(())) => Ok(()),
			Ok(Err(Error::AuthFailed)) => {
				self.core.lock().credentials.retain(|stored| stored != &credential);
				Err(Error::AuthFailed)
			}
			// Still registered, so the next connection replays it.
			Ok(Err(Error::ConnectionLoss)) | Err(_) => Ok(()),
			Ok(Err(err)) => Err(err),
		}
	}

	/// Throws the kill switch of the live connection, if any.
	pub(crate) fn kill_connection(&self) -> bool {
		match &self.core.lock().kill {
			Some(kill) => {
				kill.kill();
				true
			}
			None => false,
		}
	}

	pub(crate) async fn close(&self) {
		let previous = {
			let mut core = self.core.lock();
			std::mem::replace(&mut core.state, SessionState::Closed)
		};
		if previous.is_connected() {
			self.send_close_session().await;
		}

		self.stop.send_replace(true);
		let handle = self.task.lock().take();
		if let Some(mut handle) = handle {
			if tokio::time::timeout(self.config.close_timeout, &mut handle).await.is_err() {
				warn!(target = "zk.session", timeout = ?self.config.close_timeout, "session task did not stop, aborting it");
				handle.abort();
			}
		}
		self.terminate(Error::Closed);
	}

	async fn send_close_session(&self) {
		let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
		let (request, reply) = Request::new(ticket, OpCode::CloseSession, Bytes::new(), false, None);
		self.core.lock().priority.push_back(Outbound::Request(request));
		self.wake.notify_one();

		match tokio::time::timeout(self.config.close_timeout, reply).await {
			Ok(Ok(Ok(_))) => debug!(target = "zk.session", "server closed the session"),
			Ok(Ok(Err(err))) => debug!(target = "zk.session", error = %err, "close session failed"),
			Ok(Err(_)) | Err(_) => debug!(target = "zk.session", "close session unanswered"),
		}
	}

	/// Stops the session without talking to the server. Used when the last
	/// client handle is dropped without `close()`.
	pub(crate) fn detach(&self) {
		{
			let mut core = self.core.lock();
			if !core.state.is_terminal() {
				core.state = SessionState::Closed;
			}
		}
		self.stop.send_replace(true);
	}

	/// Fails everything outstanding with `err` and stops the loops. The first
	/// call with [`Error::Closed`] publishes `Closed` and ends the event stream.
	fn terminate(&self, err: Error) {
		let outstanding = Outstanding::take(&mut self.core.lock());
		outstanding.fail(&err);

		// The send loop holds the queue while it runs; by now it has stopped.
		if let Ok(mut queue) = self.queue_rx.try_lock() {
			queue.close();
			while let Ok(request) = queue.try_recv() {
				request.fail(err.clone());
			}
		}
		self.stop.send_replace(true);

		if err == Error::Closed && !self.closed_published.swap(true, Ordering::SeqCst) {
			info!(target = "zk.session", "session closed");
			self.events.session(SessionEvent::Closed, None);
			self.events.close();
		}
	}

	async fn run(self: Arc<Self>, mut selector: HostSelector) {
		let mut stop = self.stop.subscribe();
		let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_max);

		loop {
			if self.state().is_terminal() {
				break;
			}

			let candidate = selector.next();
			if candidate.retry_start {
				let delay = backoff.next_delay();
				debug!(target = "zk.session", ?delay, servers = selector.len(), "no server reachable, backing off");
				tokio::select! {
					biased;
					_ = stopped(&mut stop) => break,
					_ = tokio::time::sleep(delay) => {}
				}
			}

			let address = candidate.address;
			self.begin_attempt(&address);
			let attempt = tokio::select! {
				biased;
				_ = stopped(&mut stop) => break,
				attempt = self.establish(&address) => attempt,
			};
			let (conn, response) = match attempt {
				Ok(established) => established,
				Err(err) => {
					warn!(target = "zk.session", server = %address, error = %err, "connection attempt failed");
					selector.failed();
					continue;
				}
			};

			if response.is_expired() {
				self.on_expired(&address);
				continue;
			}

			selector.connected();
			backoff.reset();
			let Some(link) = self.on_connected(&address, &response, conn.kill_switch()) else {
				break;
			};

			let (reader, writer) = conn.into_split();
			let outcome = tokio::select! {
				biased;
				_ = stopped(&mut stop) => None,
				result = multiplexer::send_loop(&self, writer, link.ping_interval) => Some(result),
				result = multiplexer::recv_loop(&self, reader, link.read_timeout) => Some(result),
			};
			selector.disconnected();

			match outcome {
				None => break,
				Some(result) => {
					let err = result.err().unwrap_or(Error::Closed);
					self.on_disconnected(&address, &err);
				}
			}
		}

		let err = self.terminal_error();
		debug!(target = "zk.session", error = %err, "session task stopping");
		self.terminate(err);
	}

	fn begin_attempt(&self, address: &str) {
		{
			let mut core = self.core.lock();
			if core.state == SessionState::Disconnected {
				core.state = SessionState::Connecting;
			}
		}
		debug!(target = "zk.session", server = %address, "connecting");
		self.events.session(SessionEvent::Connecting, Some(address.to_string()));
	}

	/// Dials `address` and completes the handshake within the connect timeout.
	async fn establish(&self, address: &str) -> Result<(FramedConnection, ConnectResponse)> {
		let limit = self.config.connect_timeout;
		let request = {
			let core = self.core.lock();
			ConnectRequest::new(core.last_zxid, self.config.session_timeout.as_millis() as i32, core.session_id, &core.password)
		};

		let mut conn = self.dialer.dial(address, limit).await?;
		let handshake = async {
			let mut buf = BytesMut::with_capacity(64);
			request.encode(&mut buf);
			conn.write(&buf).await?;
			let mut frame = conn.read().await?;
			Ok::<_, Error>(ConnectResponse::decode(&mut frame)?)
		};
		let response = tokio::time::timeout(limit, handshake).await.map_err(|_| Error::Timeout(limit))??;
		Ok((conn, response))
	}

	/// The server refused to resume: start over with a new session.
	fn on_expired(&self, address: &str) {
		let (mut watches, stale) = {
			let mut core = self.core.lock();
			core.session_id = 0;
			core.password.clear();
			core.last_zxid = 0;
			let watches = std::mem::take(&mut core.watches);
			let (keep, stale): (VecDeque<Request>, VecDeque<Request>) = core.replay.drain(..).partition(|request| request.replay_safe);
			core.replay = keep;
			(watches, stale)
		};

		warn!(target = "zk.session", server = %address, watches = watches.len(), failed = stale.len(), "session expired");
		self.events.session(SessionEvent::SessionExpired, Some(address.to_string()));
		watches.fail_all(&Error::SessionExpired);
		for request in stale {
			request.fail(Error::SessionExpired);
		}
	}

	fn on_connected(self: &Arc<Self>, address: &str, response: &ConnectResponse, kill: KillSwitch) -> Option<Link> {
		let mut core = self.core.lock();
		if core.state.is_terminal() {
			return None;
		}

		let resumed = core.session_id != 0 && core.session_id == response.session_id;
		core.session_id = response.session_id;
		core.password = response.password.clone();
		core.negotiated_timeout = Duration::from_millis(response.timeout_ms.max(0) as u64);
		core.generation += 1;
		core.state = SessionState::Connected;
		core.server = Some(address.to_string());
		core.kill = Some(kill);
		core.pings_outstanding = 0;

		if resumed && !core.watches.is_empty() {
			let request = core.watches.set_watches(core.last_zxid);
			let mut payload = BytesMut::new();
			request.encode(&mut payload);
			core.priority.push_front(Outbound::Control {
				xid: SET_WATCHES_XID,
				opcode: OpCode::SetWatches,
				payload: payload.freeze(),
			});
		}

		let generation = core.generation;
		let credentials = (core.reauth_generation < generation).then(|| {
			core.reauth_generation = generation;
			core.credentials.clone()
		});
		let timeout = core.negotiated_timeout;
		let replaying = core.replay.len();
		drop(core);

		info!(
			target = "zk.session",
			server = %address,
			session_id = format_args!("{:#x}", response.session_id),
			timeout_ms = response.timeout_ms,
			generation,
			resumed,
			replaying,
			"session established"
		);
		self.events.session(SessionEvent::Connected, Some(address.to_string()));
		self.wake.notify_one();
		if let Some(credentials) = credentials {
			reauth::spawn(Arc::clone(self), generation, address.to_string(), credentials);
		}

		Some(Link {
			ping_interval: (timeout / 3).max(MIN_TICK),
			read_timeout: (timeout * 2 / 3).max(MIN_TICK),
		})
	}

	/// Moves unanswered requests to the replay buffer or fails them, per the
	/// replay policy.
	fn on_disconnected(&self, address: &str, err: &Error) {
		let mut core = self.core.lock();
		core.kill = None;
		core.server = None;
		core.pings_outstanding = 0;

		if core.state.is_terminal() {
			let terminal = core.terminal_error();
			let outstanding = Outstanding::take(&mut core);
			drop(core);
			outstanding.fail(&terminal);
			return;
		}
		core.state = SessionState::Reconnecting;

		let replay_all = self.config.replay_policy == ReplayPolicy::All;
		let mut lost = Vec::new();
		for request in core.in_flight.drain() {
			if request.is_abandoned() {
				continue;
			}
			if request.replay_safe || replay_all {
				core.replay.push_back(request);
			} else {
				lost.push(request);
			}
		}
		core.replay.make_contiguous().sort_by_key(|request| request.ticket);

		let priority: Vec<Outbound> = core.priority.drain(..).collect();
		for outbound in priority {
			if let Outbound::Request(request) = outbound {
				lost.push(request);
			}
		}
		let waiters: Vec<_> = core.auth_waiters.drain(..).collect();
		let replaying = core.replay.len();
		drop(core);

		warn!(target = "zk.session", server = %address, error = %err, replaying, failed = lost.len(), "connection lost");
		for request in lost {
			request.fail(Error::ConnectionLoss);
		}
		for waiter in waiters {
			let _ = waiter.send(Err(Error::ConnectionLoss));
		}
		self.events.session(SessionEvent::Disconnected, Some(address.to_string()));
	}
}
