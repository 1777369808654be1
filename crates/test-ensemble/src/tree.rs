//! State every member of the ensemble shares: the node tree, sessions and
//! server-side watches.
//!
//! All methods are synchronous and run under one lock held by the caller.
//! Watch notifications are pushed straight into the owning session's
//! connection outbox, so they precede the reply to the request that caused
//! them, as on a real server.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tracing::debug;
use zk_protocol::{
	Acl, CreateRequest, Decode, DeleteRequest, Encode, ErrorCode, EventType, GetAclResponse, GetChildren2Response, GetChildrenResponse, GetDataResponse, Id, KeeperState, OpCode,
	PASSWORD_LEN, PathRequest, PathResponse, PathWatchRequest, ReplyHeader, SetAclRequest, SetDataRequest, SetWatches, Stat, StatResponse, WATCHER_EVENT_XID, WatcherEvent, perms,
};

pub(crate) type SessionId = i64;

/// Instruction for a connection's writer task.
#[derive(Debug)]
pub(crate) enum Outgoing {
	Frame(Bytes),
	Close,
}

/// Write side of one client connection.
#[derive(Debug, Clone)]
pub(crate) struct ConnHandle {
	pub id: u64,
	pub outbox: mpsc::UnboundedSender<Outgoing>,
}

impl ConnHandle {
	pub(crate) fn send(&self, frame: Bytes) {
		let _ = self.outbox.send(Outgoing::Frame(frame));
	}

	pub(crate) fn close(&self) {
		let _ = self.outbox.send(Outgoing::Close);
	}
}

pub(crate) struct SessionEntry {
	password: Vec<u8>,
	pub timeout: Duration,
	last_seen: Instant,
	ids: Vec<Id>,
	conn: Option<ConnHandle>,
}

struct Node {
	data: Vec<u8>,
	acl: Vec<Acl>,
	stat: Stat,
	children: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy)]
enum WatchClass {
	Data,
	Child,
}

/// Answer to one request: header fields plus the encoded body.
#[derive(Debug)]
pub(crate) struct Reply {
	pub zxid: i64,
	pub err: ErrorCode,
	pub body: BytesMut,
}

impl Reply {
	/// Full frame for `xid`.
	pub(crate) fn frame(self, xid: i32) -> Bytes {
		let mut buf = BytesMut::with_capacity(16 + self.body.len());
		ReplyHeader {
			xid,
			zxid: self.zxid,
			err: self.err.code(),
		}
		.encode(&mut buf);
		buf.extend_from_slice(&self.body);
		buf.freeze()
	}
}

/// Read-only copy of one node, for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
	pub data: Vec<u8>,
	pub acl: Vec<Acl>,
	pub stat: Stat,
	pub children: Vec<String>,
}

type OpResult = std::result::Result<BytesMut, ErrorCode>;

pub(crate) struct Tree {
	nodes: HashMap<String, Node>,
	zxid: i64,
	data_watches: HashMap<String, HashSet<SessionId>>,
	child_watches: HashMap<String, HashSet<SessionId>>,
	sessions: HashMap<SessionId, SessionEntry>,
	next_session: SessionId,
}

impl Tree {
	pub(crate) fn new() -> Self {
		let mut nodes = HashMap::new();
		nodes.insert(
			"/".to_string(),
			Node {
				data: Vec::new(),
				acl: Acl::world_all(),
				stat: Stat::default(),
				children: BTreeSet::new(),
			},
		);
		Self {
			nodes,
			zxid: 0,
			data_watches: HashMap::new(),
			child_watches: HashMap::new(),
			sessions: HashMap::new(),
			next_session: 0x0100_0000_0000_0001,
		}
	}

	pub(crate) fn zxid(&self) -> i64 {
		self.zxid
	}

	// Sessions

	pub(crate) fn open_session(&mut self, timeout: Duration, conn: ConnHandle) -> (SessionId, Vec<u8>) {
		let id = self.next_session;
		self.next_session += 1;
		let password: Vec<u8> = (0..PASSWORD_LEN).map(|_| rand::random::<u8>()).collect();
		self.sessions.insert(
			id,
			SessionEntry {
				password: password.clone(),
				timeout,
				last_seen: Instant::now(),
				ids: Vec::new(),
				conn: Some(conn),
			},
		);
		debug!(target = "zk.ensemble", session_id = format_args!("{id:#x}"), ?timeout, "session opened");
		(id, password)
	}

	/// Moves a live session onto `conn`. `None` means the session is gone or
	/// the password does not match.
	pub(crate) fn resume_session(&mut self, id: SessionId, password: &[u8], conn: ConnHandle) -> Option<Duration> {
		let entry = self.sessions.get_mut(&id)?;
		if entry.password != password {
			return None;
		}
		if let Some(previous) = entry.conn.replace(conn) {
			previous.close();
		}
		entry.last_seen = Instant::now();
		let timeout = entry.timeout;
		self.forget_watches(id);
		debug!(target = "zk.ensemble", session_id = format_args!("{id:#x}"), "session resumed");
		Some(timeout)
	}

	pub(crate) fn touch(&mut self, id: SessionId) {
		if let Some(entry) = self.sessions.get_mut(&id) {
			entry.last_seen = Instant::now();
		}
	}

	/// The connection `conn_id` went away. Its watches go with it; the client
	/// re-registers them after reconnecting.
	pub(crate) fn detach(&mut self, id: SessionId, conn_id: u64) {
		let Some(entry) = self.sessions.get_mut(&id) else {
			return;
		};
		if entry.conn.as_ref().is_some_and(|conn| conn.id == conn_id) {
			entry.conn = None;
			self.forget_watches(id);
		}
	}

	pub(crate) fn add_identity(&mut self, id: SessionId, identity: Id) {
		if let Some(entry) = self.sessions.get_mut(&id) {
			if !entry.ids.contains(&identity) {
				entry.ids.push(identity);
			}
		}
	}

	pub(crate) fn has_session(&self, id: SessionId) -> bool {
		self.sessions.contains_key(&id)
	}

	pub(crate) fn session_ids(&self) -> Vec<SessionId> {
		let mut ids: Vec<SessionId> = self.sessions.keys().copied().collect();
		ids.sort_unstable();
		ids
	}

	/// Ends a session: its ephemeral nodes are deleted and its connection is
	/// closed. Returns `false` for an unknown session.
	pub(crate) fn close_session(&mut self, id: SessionId) -> bool {
		let Some(entry) = self.sessions.remove(&id) else {
			return false;
		};
		self.forget_watches(id);

		let mut owned: Vec<String> = self.nodes.iter().filter(|(_, node)| node.stat.ephemeral_owner == id).map(|(path, _)| path.clone()).collect();
		owned.sort();
		for path in &owned {
			self.remove_node(path);
		}
		if let Some(conn) = entry.conn {
			conn.close();
		}
		debug!(target = "zk.ensemble", session_id = format_args!("{id:#x}"), ephemerals = owned.len(), "session ended");
		true
	}

	/// Sessions not heard from within their timeout.
	pub(crate) fn expired(&self, now: Instant) -> Vec<SessionId> {
		self.sessions
			.iter()
			.filter(|(_, entry)| now.saturating_duration_since(entry.last_seen) > entry.timeout)
			.map(|(id, _)| *id)
			.collect()
	}

	// Requests

	/// Runs one node operation for `session`.
	pub(crate) fn apply(&mut self, session: SessionId, opcode: OpCode, body: &mut Bytes) -> Reply {
		let result = match opcode {
			OpCode::Create => decode(body).and_then(|request| self.create(session, request)),
			OpCode::Delete => decode(body).and_then(|request| self.delete(session, request)),
			OpCode::Exists => decode(body).and_then(|request| self.exists(session, request)),
			OpCode::GetData => decode(body).and_then(|request| self.get_data(session, request)),
			OpCode::SetData => decode(body).and_then(|request| self.set_data(session, request)),
			OpCode::GetAcl => decode(body).and_then(|request| self.get_acl(request)),
			OpCode::SetAcl => decode(body).and_then(|request| self.set_acl(session, request)),
			OpCode::GetChildren => decode(body).and_then(|request| self.get_children(session, request, false)),
			OpCode::GetChildren2 => decode(body).and_then(|request| self.get_children(session, request, true)),
			OpCode::Sync => decode::<PathRequest>(body).map(|request| encoded(PathResponse { path: request.path })),
			_ => Err(ErrorCode::Unimplemented),
		};
		let (err, body) = match result {
			Ok(body) => (ErrorCode::Ok, body),
			Err(code) => (code, BytesMut::new()),
		};
		Reply { zxid: self.zxid, err, body }
	}

	fn create(&mut self, session: SessionId, request: CreateRequest) -> OpResult {
		if !is_valid_path(&request.path) || request.path == "/" {
			return Err(ErrorCode::BadArguments);
		}
		let acl = self.expand_acl(session, request.acl)?;
		let parent_path = parent_of(&request.path).to_string();
		let ids = self.identities(session);

		let parent = self.nodes.get(&parent_path).ok_or(ErrorCode::NoNode)?;
		if parent.stat.ephemeral_owner != 0 {
			return Err(ErrorCode::NoChildrenForEphemerals);
		}
		if !permits(&parent.acl, perms::CREATE, &ids) {
			return Err(ErrorCode::NoAuth);
		}
		let path = if request.flags.is_sequential() {
			format!("{}{:010}", request.path, parent.stat.cversion)
		} else {
			request.path
		};
		if self.nodes.contains_key(&path) {
			return Err(ErrorCode::NodeExists);
		}

		self.zxid += 1;
		let zxid = self.zxid;
		let now = now_ms();
		self.nodes.insert(
			path.clone(),
			Node {
				stat: Stat {
					czxid: zxid,
					mzxid: zxid,
					pzxid: zxid,
					ctime: now,
					mtime: now,
					ephemeral_owner: if request.flags.is_ephemeral() { session } else { 0 },
					data_length: request.data.len() as i32,
					..Stat::default()
				},
				data: request.data,
				acl,
				children: BTreeSet::new(),
			},
		);
		if let Some(parent) = self.nodes.get_mut(&parent_path) {
			parent.children.insert(last_segment(&path).to_string());
			parent.stat.cversion += 1;
			parent.stat.num_children = parent.children.len() as i32;
			parent.stat.pzxid = zxid;
		}

		self.fire(WatchClass::Data, &path, EventType::NodeCreated);
		self.fire(WatchClass::Child, &parent_path, EventType::NodeChildrenChanged);
		Ok(encoded(PathResponse { path }))
	}

	fn delete(&mut self, session: SessionId, request: DeleteRequest) -> OpResult {
		if request.path == "/" || !is_valid_path(&request.path) {
			return Err(ErrorCode::BadArguments);
		}
		let node = self.nodes.get(&request.path).ok_or(ErrorCode::NoNode)?;
		if request.version != -1 && request.version != node.stat.version {
			return Err(ErrorCode::BadVersion);
		}
		if !node.children.is_empty() {
			return Err(ErrorCode::NotEmpty);
		}
		let ids = self.identities(session);
		let parent_acl = self.nodes.get(parent_of(&request.path)).map(|parent| parent.acl.as_slice()).unwrap_or_default();
		if !permits(parent_acl, perms::DELETE, &ids) {
			return Err(ErrorCode::NoAuth);
		}

		self.remove_node(&request.path);
		Ok(BytesMut::new())
	}

	fn remove_node(&mut self, path: &str) {
		if self.nodes.remove(path).is_none() {
			return;
		}
		self.zxid += 1;
		let parent_path = parent_of(path).to_string();
		if let Some(parent) = self.nodes.get_mut(&parent_path) {
			parent.children.remove(last_segment(path));
			parent.stat.cversion += 1;
			parent.stat.num_children = parent.children.len() as i32;
			parent.stat.pzxid = self.zxid;
		}

		self.fire(WatchClass::Data, path, EventType::NodeDeleted);
		self.fire(WatchClass::Child, path, EventType::NodeDeleted);
		self.fire(WatchClass::Child, &parent_path, EventType::NodeChildrenChanged);
	}

	fn exists(&mut self, session: SessionId, request: PathWatchRequest) -> OpResult {
		// An exists watch is armed whether or not the node is there.
		if request.watch {
			self.arm(WatchClass::Data, &request.path, session);
		}
		let node = self.nodes.get(&request.path).ok_or(ErrorCode::NoNode)?;
		Ok(encoded(StatResponse { stat: node.stat }))
	}

	fn get_data(&mut self, session: SessionId, request: PathWatchRequest) -> OpResult {
		let ids = self.identities(session);
		let node = self.nodes.get(&request.path).ok_or(ErrorCode::NoNode)?;
		if !permits(&node.acl, perms::READ, &ids) {
			return Err(ErrorCode::NoAuth);
		}
		let response = GetDataResponse {
			data: node.data.clone(),
			stat: node.stat,
		};
		if request.watch {
			self.arm(WatchClass::Data, &request.path, session);
		}
		Ok(encoded(response))
	}

	fn set_data(&mut self, session: SessionId, request: SetDataRequest) -> OpResult {
		let ids = self.identities(session);
		let zxid = self.zxid + 1;
		let node = self.nodes.get_mut(&request.path).ok_or(ErrorCode::NoNode)?;
		if !permits(&node.acl, perms::WRITE, &ids) {
			return Err(ErrorCode::NoAuth);
		}
		if request.version != -1 && request.version != node.stat.version {
			return Err(ErrorCode::BadVersion);
		}

		node.stat.version += 1;
		node.stat.mzxid = zxid;
		node.stat.mtime = now_ms();
		node.stat.data_length = request.data.len() as i32;
		node.data = request.data;
		let stat = node.stat;
		self.zxid = zxid;

		self.fire(WatchClass::Data, &request.path, EventType::NodeDataChanged);
		Ok(encoded(StatResponse { stat }))
	}

	fn get_acl(&self, request: PathRequest) -> OpResult {
		let node = self.nodes.get(&request.path).ok_or(ErrorCode::NoNode)?;
		Ok(encoded(GetAclResponse {
			acl: node.acl.clone(),
			stat: node.stat,
		}))
	}

	fn set_acl(&mut self, session: SessionId, request: SetAclRequest) -> OpResult {
		let acl = self.expand_acl(session, request.acl)?;
		let ids = self.identities(session);
		let zxid = self.zxid + 1;
		let node = self.nodes.get_mut(&request.path).ok_or(ErrorCode::NoNode)?;
		if !permits(&node.acl, perms::ADMIN, &ids) {
			return Err(ErrorCode::NoAuth);
		}
		if request.version != -1 && request.version != node.stat.aversion {
			return Err(ErrorCode::BadVersion);
		}

		node.acl = acl;
		node.stat.aversion += 1;
		let stat = node.stat;
		self.zxid = zxid;
		Ok(encoded(StatResponse { stat }))
	}

	fn get_children(&mut self, session: SessionId, request: PathWatchRequest, with_stat: bool) -> OpResult {
		let ids = self.identities(session);
		let node = self.nodes.get(&request.path).ok_or(ErrorCode::NoNode)?;
		if !permits(&node.acl, perms::READ, &ids) {
			return Err(ErrorCode::NoAuth);
		}
		let children: Vec<String> = node.children.iter().cloned().collect();
		let body = if with_stat {
			encoded(GetChildren2Response { children, stat: node.stat })
		} else {
			encoded(GetChildrenResponse { children })
		};
		if request.watch {
			self.arm(WatchClass::Child, &request.path, session);
		}
		Ok(body)
	}

	/// Re-arms watches a client held before reconnecting. Anything that changed
	/// after `relative_zxid` fires immediately instead.
	pub(crate) fn set_watches(&mut self, session: SessionId, request: SetWatches) {
		let mut fired = Vec::new();
		for path in request.data_watches {
			match self.nodes.get(&path) {
				None => fired.push((EventType::NodeDeleted, path)),
				Some(node) if node.stat.mzxid > request.relative_zxid => fired.push((EventType::NodeDataChanged, path)),
				Some(_) => self.arm(WatchClass::Data, &path, session),
			}
		}
		for path in request.exist_watches {
			match self.nodes.get(&path) {
				Some(_) => fired.push((EventType::NodeCreated, path)),
				None => self.arm(WatchClass::Data, &path, session),
			}
		}
		for path in request.child_watches {
			match self.nodes.get(&path) {
				None => fired.push((EventType::NodeDeleted, path)),
				Some(node) if node.stat.pzxid > request.relative_zxid => fired.push((EventType::NodeChildrenChanged, path)),
				Some(_) => self.arm(WatchClass::Child, &path, session),
			}
		}

		let Some(conn) = self.sessions.get(&session).and_then(|entry| entry.conn.as_ref()) else {
			return;
		};
		for (event_type, path) in fired {
			conn.send(notification(event_type, &path));
		}
	}

	pub(crate) fn snapshot(&self, path: &str) -> Option<NodeSnapshot> {
		self.nodes.get(path).map(|node| NodeSnapshot {
			data: node.data.clone(),
			acl: node.acl.clone(),
			stat: node.stat,
			children: node.children.iter().cloned().collect(),
		})
	}

	// Watches and permissions

	fn watches_mut(&mut self, class: WatchClass) -> &mut HashMap<String, HashSet<SessionId>> {
		match class {
			WatchClass::Data => &mut self.data_watches,
			WatchClass::Child => &mut self.child_watches,
		}
	}

	fn arm(&mut self, class: WatchClass, path: &str, session: SessionId) {
		self.watches_mut(class).entry(path.to_string()).or_default().insert(session);
	}

	fn fire(&mut self, class: WatchClass, path: &str, event_type: EventType) {
		let Some(watchers) = self.watches_mut(class).remove(path) else {
			return;
		};
		let frame = notification(event_type, path);
		for session in watchers {
			if let Some(conn) = self.sessions.get(&session).and_then(|entry| entry.conn.as_ref()) {
				conn.send(frame.clone());
			}
		}
	}

	fn forget_watches(&mut self, session: SessionId) {
		for watches in [&mut self.data_watches, &mut self.child_watches] {
			watches.retain(|_, sessions| {
				sessions.remove(&session);
				!sessions.is_empty()
			});
		}
	}

	fn identities(&self, session: SessionId) -> Vec<Id> {
		self.sessions.get(&session).map(|entry| entry.ids.clone()).unwrap_or_default()
	}

	/// Replaces `auth` entries with the session's authenticated identities.
	fn expand_acl(&self, session: SessionId, acl: Vec<Acl>) -> std::result::Result<Vec<Acl>, ErrorCode> {
		if acl.is_empty() {
			return Err(ErrorCode::InvalidAcl);
		}
		let ids = self.identities(session);
		let mut expanded = Vec::with_capacity(acl.len());
		for entry in acl {
			if entry.id.scheme != "auth" {
				expanded.push(entry);
				continue;
			}
			if ids.is_empty() {
				return Err(ErrorCode::InvalidAcl);
			}
			expanded.extend(ids.iter().map(|id| Acl {
				perms: entry.perms,
				id: id.clone(),
			}));
		}
		Ok(expanded)
	}
}

fn permits(acl: &[Acl], perm: i32, ids: &[Id]) -> bool {
	acl.iter()
		.any(|entry| entry.perms & perm != 0 && ((entry.id.scheme == "world" && entry.id.id == "anyone") || ids.contains(&entry.id)))
}

fn decode<T: Decode>(body: &mut Bytes) -> std::result::Result<T, ErrorCode> {
	T::decode(body).map_err(|_| ErrorCode::MarshallingError)
}

fn encoded(record: impl Encode) -> BytesMut {
	let mut buf = BytesMut::with_capacity(record.encoded_len_hint());
	record.encode(&mut buf);
	buf
}

pub(crate) fn notification(event_type: EventType, path: &str) -> Bytes {
	let mut buf = BytesMut::new();
	ReplyHeader {
		xid: WATCHER_EVENT_XID,
		zxid: -1,
		err: 0,
	}
	.encode(&mut buf);
	WatcherEvent {
		event_type,
		state: KeeperState::SyncConnected,
		path: path.to_string(),
	}
	.encode(&mut buf);
	buf.freeze()
}

fn is_valid_path(path: &str) -> bool {
	path == "/" || (path.starts_with('/') && !path.ends_with('/') && !path.contains("//"))
}

fn parent_of(path: &str) -> &str {
	match path.rfind('/') {
		Some(0) | None => "/",
		Some(index) => &path[..index],
	}
}

fn last_segment(path: &str) -> &str {
	path.rsplit('/').next().unwrap_or(path)
}

fn now_ms() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_millis() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
	use zk_protocol::{CreateFlags, ReplyHeader};

	use super::*;

	fn conn(id: u64) -> (ConnHandle, mpsc::UnboundedReceiver<Outgoing>) {
		let (outbox, rx) = mpsc::unbounded_channel();
		(ConnHandle { id, outbox }, rx)
	}

	fn request(record: impl Encode) -> Bytes {
		encoded(record).freeze()
	}

	fn create(tree: &mut Tree, session: SessionId, path: &str, flags: CreateFlags) -> Reply {
		let body = request(CreateRequest {
			path: path.into(),
			data: b"d".to_vec(),
			acl: Acl::world_all(),
			flags,
		});
		tree.apply(session, OpCode::Create, &mut body.clone())
	}

	fn created_path(reply: Reply) -> String {
		assert_eq!(reply.err, ErrorCode::Ok);
		PathResponse::decode(&mut reply.body.freeze()).unwrap().path
	}

	fn next_event(rx: &mut mpsc::UnboundedReceiver<Outgoing>) -> Option<WatcherEvent> {
		match rx.try_recv().ok()? {
			Outgoing::Frame(mut frame) => {
				let header = ReplyHeader::decode(&mut frame).unwrap();
				assert_eq!(header.xid, WATCHER_EVENT_XID);
				Some(WatcherEvent::decode(&mut frame).unwrap())
			}
			Outgoing::Close => None,
		}
	}

	#[test]
	fn sequential_names_count_parent_changes() {
		let mut tree = Tree::new();
		let (handle, _rx) = conn(1);
		let (session, _) = tree.open_session(Duration::from_secs(10), handle);

		created_path(create(&mut tree, session, "/q", CreateFlags::PERSISTENT));
		assert_eq!(created_path(create(&mut tree, session, "/q/n-", CreateFlags::SEQUENTIAL)), "/q/n-0000000000");
		assert_eq!(created_path(create(&mut tree, session, "/q/n-", CreateFlags::SEQUENTIAL)), "/q/n-0000000001");
		assert_eq!(tree.snapshot("/q").unwrap().stat.num_children, 2);
	}

	#[test]
	fn closing_a_session_removes_its_ephemerals() {
		let mut tree = Tree::new();
		let (handle, _rx) = conn(1);
		let (owner, _) = tree.open_session(Duration::from_secs(10), handle);

		created_path(create(&mut tree, owner, "/keep", CreateFlags::PERSISTENT));
		created_path(create(&mut tree, owner, "/keep/e", CreateFlags::EPHEMERAL));
		assert_eq!(create(&mut tree, owner, "/keep/e/child", CreateFlags::PERSISTENT).err, ErrorCode::NoChildrenForEphemerals);

		assert!(tree.close_session(owner));
		assert!(tree.snapshot("/keep/e").is_none());
		assert!(tree.snapshot("/keep").is_some());
		assert!(!tree.close_session(owner));
	}

	#[test]
	fn watches_fire_once() {
		let mut tree = Tree::new();
		let (handle, mut rx) = conn(1);
		let (session, _) = tree.open_session(Duration::from_secs(10), handle);

		let mut exists = request(PathWatchRequest {
			path: "/w".into(),
			watch: true,
		});
		assert_eq!(tree.apply(session, OpCode::Exists, &mut exists).err, ErrorCode::NoNode);

		created_path(create(&mut tree, session, "/w", CreateFlags::PERSISTENT));
		let event = next_event(&mut rx).unwrap();
		assert_eq!((event.event_type, event.path.as_str()), (EventType::NodeCreated, "/w"));

		let mut set = request(SetDataRequest {
			path: "/w".into(),
			data: b"x".to_vec(),
			version: -1,
		});
		assert_eq!(tree.apply(session, OpCode::SetData, &mut set).err, ErrorCode::Ok);
		assert!(next_event(&mut rx).is_none());
	}

	#[test]
	fn set_watches_fires_for_missed_changes() {
		let mut tree = Tree::new();
		let (handle, mut rx) = conn(1);
		let (session, _) = tree.open_session(Duration::from_secs(10), handle);
		created_path(create(&mut tree, session, "/a", CreateFlags::PERSISTENT));
		let seen = tree.zxid();
		created_path(create(&mut tree, session, "/b", CreateFlags::PERSISTENT));

		tree.set_watches(
			session,
			SetWatches {
				relative_zxid: seen,
				data_watches: vec!["/a".into(), "/gone".into()],
				exist_watches: vec!["/b".into()],
				child_watches: vec!["/".into()],
			},
		);
		let events: Vec<(EventType, String)> = std::iter::from_fn(|| next_event(&mut rx)).map(|event| (event.event_type, event.path)).collect();
		assert_eq!(
			events,
			[
				(EventType::NodeDeleted, "/gone".to_string()),
				(EventType::NodeCreated, "/b".to_string()),
				(EventType::NodeChildrenChanged, "/".to_string()),
			]
		);
	}

	#[test]
	fn digest_acl_requires_the_matching_identity() {
		let mut tree = Tree::new();
		let (first, _rx1) = conn(1);
		let (second, _rx2) = conn(2);
		let (owner, _) = tree.open_session(Duration::from_secs(10), first);
		let (stranger, _) = tree.open_session(Duration::from_secs(10), second);
		tree.add_identity(
			owner,
			Id {
				scheme: "digest".into(),
				id: "alice".into(),
			},
		);

		let mut body = request(CreateRequest {
			path: "/private".into(),
			data: Vec::new(),
			acl: Acl::auth(perms::ALL),
			flags: CreateFlags::PERSISTENT,
		});
		assert_eq!(tree.apply(owner, OpCode::Create, &mut body).err, ErrorCode::Ok);
		assert_eq!(tree.snapshot("/private").unwrap().acl, Acl::digest("alice", perms::ALL));

		let read = request(PathWatchRequest {
			path: "/private".into(),
			watch: false,
		});
		assert_eq!(tree.apply(stranger, OpCode::GetData, &mut read.clone()).err, ErrorCode::NoAuth);
		assert_eq!(tree.apply(owner, OpCode::GetData, &mut read.clone()).err, ErrorCode::Ok);
	}

	#[test]
	fn resuming_needs_the_password() {
		let mut tree = Tree::new();
		let (first, _rx1) = conn(1);
		let (second, mut rx2) = conn(2);
		let (third, _rx3) = conn(3);
		let (session, password) = tree.open_session(Duration::from_secs(10), first);

		assert!(tree.resume_session(session, &[0; PASSWORD_LEN], second.clone()).is_none());
		assert_eq!(tree.resume_session(session, &password, second), Some(Duration::from_secs(10)));
		// A newer connection evicts the older one.
		tree.resume_session(session, &password, third);
		assert!(matches!(rx2.try_recv(), Ok(Outgoing::Close)));
	}

	#[test]
	fn paths_and_parents() {
		assert_eq!(parent_of("/a"), "/");
		assert_eq!(parent_of("/a/b"), "/a");
		assert_eq!(last_segment("/a/b"), "b");
		assert!(is_valid_path("/a/b"));
		assert!(!is_valid_path("a"));
		assert!(!is_valid_path("/a/"));
	}
}
