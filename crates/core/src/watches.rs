//! One-shot watch listeners keyed by path and kind.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::oneshot;
use zk_protocol::{ErrorCode, SetWatches};

use crate::error::{Error, Result};
use crate::events::NodeEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchKind {
	/// Set by `get_w`, and by `exists_w` on a node that exists.
	Data,
	/// Set by `exists_w` on a node that does not exist yet.
	Exist,
	/// Set by `children_w`.
	Child,
}

impl WatchKind {
	/// Kinds triggered by a node event.
	fn triggered_by(event: NodeEvent) -> &'static [WatchKind] {
		match event {
			NodeEvent::Created | NodeEvent::DataChanged => &[WatchKind::Data, WatchKind::Exist],
			NodeEvent::ChildrenChanged => &[WatchKind::Child],
			NodeEvent::Deleted => &[WatchKind::Data, WatchKind::Exist, WatchKind::Child],
		}
	}
}

/// Which watch, if any, a reply arms.
///
/// An existence check arms a data watch when the node is there and an
/// existence watch when it is not. Other kinds arm only on success.
pub(crate) fn armed_kind(requested: WatchKind, code: ErrorCode) -> Option<WatchKind> {
	match (requested, code) {
		(WatchKind::Exist, ErrorCode::Ok) => Some(WatchKind::Data),
		(WatchKind::Exist, ErrorCode::NoNode) => Some(WatchKind::Exist),
		(kind, ErrorCode::Ok) => Some(kind),
		_ => None,
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchedEvent {
	pub kind: NodeEvent,
	pub path: String,
}

type Listener = oneshot::Sender<Result<WatchedEvent>>;

/// Watch carried by a request until its reply decides whether it arms.
pub(crate) struct WatchSpec {
	pub path: String,
	pub kind: WatchKind,
	/// `None` when the caller only follows the event stream.
	pub listener: Option<Listener>,
}

impl WatchSpec {
	pub(crate) fn detached(path: &str, kind: WatchKind) -> Self {
		Self {
			path: path.to_string(),
			kind,
			listener: None,
		}
	}
}

pub(crate) fn channel(path: &str, kind: WatchKind) -> (WatchSpec, WatchReceiver) {
	let (tx, rx) = oneshot::channel();
	let spec = WatchSpec {
		path: path.to_string(),
		kind,
		listener: Some(tx),
	};
	let receiver = WatchReceiver {
		path: path.to_string(),
		kind,
		rx,
	};
	(spec, receiver)
}

/// Completes once, when the watched node changes or the session ends.
#[derive(Debug)]
pub struct WatchReceiver {
	path: String,
	kind: WatchKind,
	rx: oneshot::Receiver<Result<WatchedEvent>>,
}

impl WatchReceiver {
	pub fn path(&self) -> &str {
		&self.path
	}

	/// The kind requested. A successful `exists_w` may have armed a data watch instead.
	pub fn kind(&self) -> WatchKind {
		self.kind
	}

	/// Waits for the change. Fails with [`Error::SessionExpired`] or
	/// [`Error::Closed`] if the session ends first.
	pub async fn recv(self) -> Result<WatchedEvent> {
		self.rx.await.unwrap_or(Err(Error::Closed))
	}
}

/// Armed watches. An entry with no listeners still exists server side and is
/// re-registered after a reconnect.
#[derive(Default)]
pub(crate) struct WatchRegistry {
	watches: HashMap<(String, WatchKind), Vec<Listener>>,
}

impl WatchRegistry {
	pub(crate) fn arm(&mut self, spec: WatchSpec, kind: WatchKind) {
		let listeners = self.watches.entry((spec.path, kind)).or_default();
		if let Some(listener) = spec.listener {
			listeners.push(listener);
		}
	}

	/// Delivers `event` to every listener it triggers and disarms them.
	/// Returns how many listeners were notified.
	pub(crate) fn fire(&mut self, event: NodeEvent, path: &str) -> usize {
		let mut fired = 0;
		for kind in WatchKind::triggered_by(event) {
			let Some(listeners) = self.watches.remove(&(path.to_string(), *kind)) else {
				continue;
			};
			for listener in listeners {
				let delivered = listener
					.send(Ok(WatchedEvent {
						kind: event,
						path: path.to_string(),
					}))
					.is_ok();
				fired += usize::from(delivered);
			}
		}
		fired
	}

	/// Disarms everything, failing each listener with `err`.
	pub(crate) fn fail_all(&mut self, err: &Error) {
		for (_, listeners) in self.watches.drain() {
			for listener in listeners {
				let _ = listener.send(Err(err.clone()));
			}
		}
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.watches.is_empty()
	}

	pub(crate) fn len(&self) -> usize {
		self.watches.len()
	}

	/// Registration request that restores every armed watch on a new connection.
	pub(crate) fn set_watches(&self, relative_zxid: i64) -> SetWatches {
		let mut request = SetWatches {
			relative_zxid,
			data_watches: Vec::new(),
			exist_watches: Vec::new(),
			child_watches: Vec::new(),
		};
		for (path, kind) in self.watches.keys() {
			let list = match kind {
				WatchKind::Data => &mut request.data_watches,
				WatchKind::Exist => &mut request.exist_watches,
				WatchKind::Child => &mut request.child_watches,
			};
			list.push(path.clone());
		}
		request.data_watches.sort();
		request.exist_watches.sort();
		request.child_watches.sort();
		request
	}
}
