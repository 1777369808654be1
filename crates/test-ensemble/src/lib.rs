//! In-process ZooKeeper ensemble for integration tests.
//!
//! Every member listens on its own loopback port and shares one tree and one
//! session table, so a client can fail over between members and resume its
//! session exactly as against a real ensemble. Members can be stopped,
//! restarted, or made to swallow requests; sessions can be expired on demand
//! and credentials rejected.
//!
//! ```ignore
//! let ensemble = Ensemble::start(3).await?;
//! let (client, events) = Client::connect(ensemble.addresses(), Duration::from_secs(5)).await?;
//! ensemble.stop_server(0).await?;
//! ```

mod error;
mod server;
mod tree;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use zk_runtime::DEFAULT_MAX_FRAME_LEN;

pub use error::{Error, Result};
pub use tree::NodeSnapshot;

use server::Member;
use tree::Tree;

const REAPER_INTERVAL: Duration = Duration::from_millis(20);

/// One authentication packet as the ensemble saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRecord {
	/// Index of the member that received it.
	pub server: usize,
	pub session_id: i64,
	pub scheme: String,
	pub accepted: bool,
}

/// State shared by every member.
pub(crate) struct Inner {
	pub tree: Mutex<Tree>,
	pub rejected: Mutex<Vec<(String, Vec<u8>)>>,
	pub auth_log: Mutex<Vec<AuthRecord>>,
	pub max_frame_len: usize,
	pub min_session_timeout: Duration,
	pub max_session_timeout: Duration,
	next_conn: AtomicU64,
}

impl Inner {
	pub(crate) fn next_conn_id(&self) -> u64 {
		self.next_conn.fetch_add(1, Ordering::Relaxed)
	}
}

struct Slot {
	address: SocketAddr,
	member: Arc<Member>,
	stop: watch::Sender<bool>,
	task: Option<JoinHandle<()>>,
}

/// Configures an [`Ensemble`].
#[derive(Debug, Clone)]
pub struct EnsembleBuilder {
	servers: usize,
	min_session_timeout: Duration,
	max_session_timeout: Duration,
	max_frame_len: usize,
}

impl EnsembleBuilder {
	pub fn new() -> Self {
		Self {
			servers: 1,
			min_session_timeout: Duration::from_millis(100),
			max_session_timeout: Duration::from_secs(60),
			max_frame_len: DEFAULT_MAX_FRAME_LEN,
		}
	}

	pub fn servers(mut self, servers: usize) -> Self {
		self.servers = servers.max(1);
		self
	}

	/// Bounds applied to the session timeout a client asks for.
	pub fn session_timeout_bounds(mut self, min: Duration, max: Duration) -> Self {
		self.min_session_timeout = min;
		self.max_session_timeout = max.max(min);
		self
	}

	pub fn max_frame_len(mut self, len: usize) -> Self {
		self.max_frame_len = len;
		self
	}

	pub async fn start(self) -> Result<Ensemble> {
		let inner = Arc::new(Inner {
			tree: Mutex::new(Tree::new()),
			rejected: Mutex::new(Vec::new()),
			auth_log: Mutex::new(Vec::new()),
			max_frame_len: self.max_frame_len,
			min_session_timeout: self.min_session_timeout,
			max_session_timeout: self.max_session_timeout,
			next_conn: AtomicU64::new(1),
		});

		let mut slots = Vec::with_capacity(self.servers);
		for index in 0..self.servers {
			let listener = TcpListener::bind("127.0.0.1:0").await?;
			let member = Arc::new(Member {
				index,
				unresponsive: AtomicBool::new(false),
			});
			slots.push(Mutex::new(spawn_member(&inner, member, listener)?));
		}

		let reaper = tokio::spawn(reap(Arc::clone(&inner)));
		let ensemble = Ensemble { inner, slots, reaper };
		info!(target = "zk.ensemble", servers = ?ensemble.addresses(), "ensemble started");
		Ok(ensemble)
	}
}

impl Default for EnsembleBuilder {
	fn default() -> Self {
		Self::new()
	}
}

fn spawn_member(inner: &Arc<Inner>, member: Arc<Member>, listener: TcpListener) -> Result<Slot> {
	let address = listener.local_addr()?;
	let (stop, stop_rx) = watch::channel(false);
	let task = tokio::spawn(server::serve(Arc::clone(inner), Arc::clone(&member), listener, stop_rx));
	Ok(Slot {
		address,
		member,
		stop,
		task: Some(task),
	})
}

/// Expires sessions whose clients went quiet.
async fn reap(inner: Arc<Inner>) {
	let mut tick = tokio::time::interval(REAPER_INTERVAL);
	loop {
		tick.tick().await;
		let mut tree = inner.tree.lock();
		for session_id in tree.expired(Instant::now()) {
			debug!(target = "zk.ensemble", session_id = format_args!("{session_id:#x}"), "session timed out");
			tree.close_session(session_id);
		}
	}
}

/// A running ensemble. Dropping it stops every member.
pub struct Ensemble {
	inner: Arc<Inner>,
	slots: Vec<Mutex<Slot>>,
	reaper: JoinHandle<()>,
}

impl Ensemble {
	/// Starts `servers` members with default settings.
	pub async fn start(servers: usize) -> Result<Self> {
		EnsembleBuilder::new().servers(servers).start().await
	}

	pub fn builder() -> EnsembleBuilder {
		EnsembleBuilder::new()
	}

	/// `host:port` of every member, in index order.
	pub fn addresses(&self) -> Vec<String> {
		self.slots.iter().map(|slot| slot.lock().address.to_string()).collect()
	}

	pub fn address(&self, index: usize) -> Result<String> {
		Ok(self.slot(index)?.lock().address.to_string())
	}

	fn slot(&self, index: usize) -> Result<&Mutex<Slot>> {
		self.slots.get(index).ok_or(Error::UnknownServer(index))
	}

	/// Closes the member's listener and every connection it holds. Sessions
	/// survive until they time out.
	pub async fn stop_server(&self, index: usize) -> Result<()> {
		let task = {
			let mut slot = self.slot(index)?.lock();
			slot.stop.send_replace(true);
			slot.task.take()
		};
		if let Some(task) = task {
			let _ = task.await;
		}
		info!(target = "zk.ensemble", server = index, "server stopped");
		Ok(())
	}

	/// Brings a stopped member back on its old port.
	pub async fn restart_server(&self, index: usize) -> Result<()> {
		let (address, member) = {
			let slot = self.slot(index)?.lock();
			if slot.task.is_some() {
				return Err(Error::AlreadyRunning(index));
			}
			(slot.address, Arc::clone(&slot.member))
		};
		let listener = TcpListener::bind(address).await?;
		*self.slot(index)?.lock() = spawn_member(&self.inner, member, listener)?;
		info!(target = "zk.ensemble", server = index, %address, "server restarted");
		Ok(())
	}

	pub fn is_running(&self, index: usize) -> bool {
		self.slot(index).is_ok_and(|slot| slot.lock().task.is_some())
	}

	/// While set, the member reads requests but never answers, pings included.
	pub fn set_unresponsive(&self, index: usize, unresponsive: bool) -> Result<()> {
		self.slot(index)?.lock().member.unresponsive.store(unresponsive, Ordering::SeqCst);
		Ok(())
	}

	/// Ends a session as if it had timed out. Returns `false` for an unknown id.
	pub fn expire_session(&self, session_id: i64) -> bool {
		self.inner.tree.lock().close_session(session_id)
	}

	pub fn has_session(&self, session_id: i64) -> bool {
		self.inner.tree.lock().has_session(session_id)
	}

	pub fn session_ids(&self) -> Vec<i64> {
		self.inner.tree.lock().session_ids()
	}

	/// Makes every member answer this credential with `AuthFailed`.
	pub fn reject_credential(&self, scheme: &str, data: impl Into<Vec<u8>>) {
		self.inner.rejected.lock().push((scheme.to_string(), data.into()));
	}

	/// Every auth packet received so far, in arrival order.
	pub fn auth_log(&self) -> Vec<AuthRecord> {
		self.inner.auth_log.lock().clone()
	}

	pub fn node(&self, path: &str) -> Option<NodeSnapshot> {
		self.inner.tree.lock().snapshot(path)
	}
}

impl Drop for Ensemble {
	fn drop(&mut self) {
		self.reaper.abort();
		for slot in &self.slots {
			let mut slot = slot.lock();
			slot.stop.send_replace(true);
			if let Some(task) = slot.task.take() {
				task.abort();
			}
		}
	}
}

impl std::fmt::Debug for Ensemble {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Ensemble").field("addresses", &self.addresses()).finish_non_exhaustive()
	}
}
