//! Jute record layouts for the handshake, headers, and node operations.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::codec::*;
use crate::error::DecodeError;
use crate::opcode::PASSWORD_LEN;

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// First frame a client writes on a fresh connection. Carries no request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
	pub protocol_version: i32,
	pub last_zxid_seen: i64,
	pub timeout_ms: i32,
	/// Zero asks the server for a new session.
	pub session_id: i64,
	pub password: Vec<u8>,
	pub read_only: bool,
}

impl ConnectRequest {
	/// Builds a handshake that either resumes `session_id` or starts a new session when it is zero.
	pub fn new(last_zxid_seen: i64, timeout_ms: i32, session_id: i64, password: &[u8]) -> Self {
		let password = if password.is_empty() { vec![0; PASSWORD_LEN] } else { password.to_vec() };
		Self {
			protocol_version: crate::opcode::PROTOCOL_VERSION,
			last_zxid_seen,
			timeout_ms,
			session_id,
			password,
			read_only: false,
		}
	}
}

impl Encode for ConnectRequest {
	fn encode(&self, buf: &mut BytesMut) {
		buf.put_i32(self.protocol_version);
		buf.put_i64(self.last_zxid_seen);
		buf.put_i32(self.timeout_ms);
		buf.put_i64(self.session_id);
		put_buffer(buf, &self.password);
		put_bool(buf, self.read_only);
	}
}

impl Decode for ConnectRequest {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self {
			protocol_version: get_i32(buf, "protocol_version")?,
			last_zxid_seen: get_i64(buf, "last_zxid_seen")?,
			timeout_ms: get_i32(buf, "timeout")?,
			session_id: get_i64(buf, "session_id")?,
			password: get_buffer(buf, "password")?,
			// Older clients omit the trailing flag.
			read_only: if buf.is_empty() { false } else { get_bool(buf, "read_only")? },
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
	pub protocol_version: i32,
	/// A non-positive timeout means the requested session has expired.
	pub timeout_ms: i32,
	pub session_id: i64,
	pub password: Vec<u8>,
	pub read_only: bool,
}

impl ConnectResponse {
	pub fn is_expired(&self) -> bool {
		self.timeout_ms <= 0
	}
}

impl Encode for ConnectResponse {
	fn encode(&self, buf: &mut BytesMut) {
		buf.put_i32(self.protocol_version);
		buf.put_i32(self.timeout_ms);
		buf.put_i64(self.session_id);
		put_buffer(buf, &self.password);
		put_bool(buf, self.read_only);
	}
}

impl Decode for ConnectResponse {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self {
			protocol_version: get_i32(buf, "protocol_version")?,
			timeout_ms: get_i32(buf, "timeout")?,
			session_id: get_i64(buf, "session_id")?,
			password: get_buffer(buf, "password")?,
			read_only: if buf.is_empty() { false } else { get_bool(buf, "read_only")? },
		})
	}
}

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
	pub xid: i32,
	pub opcode: i32,
}

impl Encode for RequestHeader {
	fn encode(&self, buf: &mut BytesMut) {
		buf.put_i32(self.xid);
		buf.put_i32(self.opcode);
	}
}

impl Decode for RequestHeader {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self {
			xid: get_i32(buf, "xid")?,
			opcode: get_i32(buf, "opcode")?,
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
	pub xid: i32,
	pub zxid: i64,
	pub err: i32,
}

impl Encode for ReplyHeader {
	fn encode(&self, buf: &mut BytesMut) {
		buf.put_i32(self.xid);
		buf.put_i64(self.zxid);
		buf.put_i32(self.err);
	}
}

impl Decode for ReplyHeader {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self {
			xid: get_i32(buf, "xid")?,
			zxid: get_i64(buf, "zxid")?,
			err: get_i32(buf, "err")?,
		})
	}
}

// ---------------------------------------------------------------------------
// Node metadata and ACLs
// ---------------------------------------------------------------------------

/// Node metadata returned by most read and write operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
	pub czxid: i64,
	pub mzxid: i64,
	pub ctime: i64,
	pub mtime: i64,
	pub version: i32,
	pub cversion: i32,
	pub aversion: i32,
	/// Session id owning the node, or zero for persistent nodes.
	pub ephemeral_owner: i64,
	pub data_length: i32,
	pub num_children: i32,
	pub pzxid: i64,
}

impl Stat {
	pub fn is_ephemeral(&self) -> bool {
		self.ephemeral_owner != 0
	}
}

impl Encode for Stat {
	fn encode(&self, buf: &mut BytesMut) {
		buf.put_i64(self.czxid);
		buf.put_i64(self.mzxid);
		buf.put_i64(self.ctime);
		buf.put_i64(self.mtime);
		buf.put_i32(self.version);
		buf.put_i32(self.cversion);
		buf.put_i32(self.aversion);
		buf.put_i64(self.ephemeral_owner);
		buf.put_i32(self.data_length);
		buf.put_i32(self.num_children);
		buf.put_i64(self.pzxid);
	}
}

impl Decode for Stat {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self {
			czxid: get_i64(buf, "stat.czxid")?,
			mzxid: get_i64(buf, "stat.mzxid")?,
			ctime: get_i64(buf, "stat.ctime")?,
			mtime: get_i64(buf, "stat.mtime")?,
			version: get_i32(buf, "stat.version")?,
			cversion: get_i32(buf, "stat.cversion")?,
			aversion: get_i32(buf, "stat.aversion")?,
			ephemeral_owner: get_i64(buf, "stat.ephemeral_owner")?,
			data_length: get_i32(buf, "stat.data_length")?,
			num_children: get_i32(buf, "stat.num_children")?,
			pzxid: get_i64(buf, "stat.pzxid")?,
		})
	}
}

/// Permission bits for an [`Acl`] entry.
pub mod perms {
	pub const READ: i32 = 1;
	pub const WRITE: i32 = 1 << 1;
	pub const CREATE: i32 = 1 << 2;
	pub const DELETE: i32 = 1 << 3;
	pub const ADMIN: i32 = 1 << 4;
	pub const ALL: i32 = READ | WRITE | CREATE | DELETE | ADMIN;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Id {
	pub scheme: String,
	pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Acl {
	pub perms: i32,
	pub id: Id,
}

impl Acl {
	/// An ACL granting `perms` to everyone.
	pub fn world(perms: i32) -> Vec<Acl> {
		vec![Acl {
			perms,
			id: Id {
				scheme: "world".to_string(),
				id: "anyone".to_string(),
			},
		}]
	}

	pub fn world_all() -> Vec<Acl> {
		Self::world(perms::ALL)
	}

	/// An ACL granting `perms` to whichever identities the session has authenticated as.
	pub fn auth(perms: i32) -> Vec<Acl> {
		vec![Acl {
			perms,
			id: Id {
				scheme: "auth".to_string(),
				id: String::new(),
			},
		}]
	}

	pub fn digest(user: &str, perms: i32) -> Vec<Acl> {
		vec![Acl {
			perms,
			id: Id {
				scheme: "digest".to_string(),
				id: user.to_string(),
			},
		}]
	}
}

fn put_acls(buf: &mut BytesMut, acls: &[Acl]) {
	buf.put_i32(acls.len() as i32);
	for acl in acls {
		buf.put_i32(acl.perms);
		put_string(buf, &acl.id.scheme);
		put_string(buf, &acl.id.id);
	}
}

fn get_acls(buf: &mut Bytes) -> Result<Vec<Acl>, DecodeError> {
	get_vec(buf, "acl", |buf| {
		Ok(Acl {
			perms: get_i32(buf, "acl.perms")?,
			id: Id {
				scheme: get_string(buf, "acl.scheme")?,
				id: get_string(buf, "acl.id")?,
			},
		})
	})
}

/// Create mode bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CreateFlags(pub i32);

impl CreateFlags {
	pub const PERSISTENT: Self = Self(0);
	pub const EPHEMERAL: Self = Self(1);
	pub const SEQUENTIAL: Self = Self(2);
	pub const EPHEMERAL_SEQUENTIAL: Self = Self(3);

	pub fn is_ephemeral(self) -> bool {
		self.0 & Self::EPHEMERAL.0 != 0
	}

	pub fn is_sequential(self) -> bool {
		self.0 & Self::SEQUENTIAL.0 != 0
	}
}

impl std::ops::BitOr for CreateFlags {
	type Output = Self;

	fn bitor(self, rhs: Self) -> Self {
		Self(self.0 | rhs.0)
	}
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
	pub path: String,
	pub data: Vec<u8>,
	pub acl: Vec<Acl>,
	pub flags: CreateFlags,
}

impl Encode for CreateRequest {
	fn encode(&self, buf: &mut BytesMut) {
		put_string(buf, &self.path);
		put_buffer(buf, &self.data);
		put_acls(buf, &self.acl);
		buf.put_i32(self.flags.0);
	}

	fn encoded_len_hint(&self) -> usize {
		16 + self.path.len() + self.data.len() + self.acl.len() * 32
	}
}

impl Decode for CreateRequest {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self {
			path: get_string(buf, "path")?,
			data: get_buffer(buf, "data")?,
			acl: get_acls(buf)?,
			flags: CreateFlags(get_i32(buf, "flags")?),
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
	pub path: String,
	/// `-1` matches any version.
	pub version: i32,
}

impl Encode for DeleteRequest {
	fn encode(&self, buf: &mut BytesMut) {
		put_string(buf, &self.path);
		buf.put_i32(self.version);
	}
}

impl Decode for DeleteRequest {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self {
			path: get_string(buf, "path")?,
			version: get_i32(buf, "version")?,
		})
	}
}

/// Body shared by exists, get-data and get-children requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathWatchRequest {
	pub path: String,
	pub watch: bool,
}

impl Encode for PathWatchRequest {
	fn encode(&self, buf: &mut BytesMut) {
		put_string(buf, &self.path);
		put_bool(buf, self.watch);
	}
}

impl Decode for PathWatchRequest {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self {
			path: get_string(buf, "path")?,
			watch: get_bool(buf, "watch")?,
		})
	}
}

/// Body shared by get-acl, sync and get-ephemerals requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRequest {
	pub path: String,
}

impl Encode for PathRequest {
	fn encode(&self, buf: &mut BytesMut) {
		put_string(buf, &self.path);
	}
}

impl Decode for PathRequest {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self {
			path: get_string(buf, "path")?,
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDataRequest {
	pub path: String,
	pub data: Vec<u8>,
	pub version: i32,
}

impl Encode for SetDataRequest {
	fn encode(&self, buf: &mut BytesMut) {
		put_string(buf, &self.path);
		put_buffer(buf, &self.data);
		buf.put_i32(self.version);
	}

	fn encoded_len_hint(&self) -> usize {
		12 + self.path.len() + self.data.len()
	}
}

impl Decode for SetDataRequest {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self {
			path: get_string(buf, "path")?,
			data: get_buffer(buf, "data")?,
			version: get_i32(buf, "version")?,
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetAclRequest {
	pub path: String,
	pub acl: Vec<Acl>,
	pub version: i32,
}

impl Encode for SetAclRequest {
	fn encode(&self, buf: &mut BytesMut) {
		put_string(buf, &self.path);
		put_acls(buf, &self.acl);
		buf.put_i32(self.version);
	}
}

impl Decode for SetAclRequest {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self {
			path: get_string(buf, "path")?,
			acl: get_acls(buf)?,
			version: get_i32(buf, "version")?,
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPacket {
	pub auth_type: i32,
	pub scheme: String,
	pub auth: Vec<u8>,
}

impl Encode for AuthPacket {
	fn encode(&self, buf: &mut BytesMut) {
		buf.put_i32(self.auth_type);
		put_string(buf, &self.scheme);
		put_buffer(buf, &self.auth);
	}
}

impl Decode for AuthPacket {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self {
			auth_type: get_i32(buf, "auth_type")?,
			scheme: get_string(buf, "scheme")?,
			auth: get_buffer(buf, "auth")?,
		})
	}
}

/// Re-arms watches on a new connection for the same session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetWatches {
	pub relative_zxid: i64,
	pub data_watches: Vec<String>,
	pub exist_watches: Vec<String>,
	pub child_watches: Vec<String>,
}

impl SetWatches {
	pub fn is_empty(&self) -> bool {
		self.data_watches.is_empty() && self.exist_watches.is_empty() && self.child_watches.is_empty()
	}
}

impl Encode for SetWatches {
	fn encode(&self, buf: &mut BytesMut) {
		buf.put_i64(self.relative_zxid);
		put_strings(buf, &self.data_watches);
		put_strings(buf, &self.exist_watches);
		put_strings(buf, &self.child_watches);
	}
}

impl Decode for SetWatches {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self {
			relative_zxid: get_i64(buf, "relative_zxid")?,
			data_watches: get_vec(buf, "data_watches", |b| get_string(b, "path"))?,
			exist_watches: get_vec(buf, "exist_watches", |b| get_string(b, "path"))?,
			child_watches: get_vec(buf, "child_watches", |b| get_string(b, "path"))?,
		})
	}
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Reply body holding a single path: create and sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResponse {
	pub path: String,
}

impl Encode for PathResponse {
	fn encode(&self, buf: &mut BytesMut) {
		put_string(buf, &self.path);
	}
}

impl Decode for PathResponse {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self {
			path: get_string(buf, "path")?,
		})
	}
}

/// Reply body holding only a stat: exists, set-data and set-acl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatResponse {
	pub stat: Stat,
}

impl Encode for StatResponse {
	fn encode(&self, buf: &mut BytesMut) {
		self.stat.encode(buf);
	}
}

impl Decode for StatResponse {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self { stat: Stat::decode(buf)? })
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetDataResponse {
	pub data: Vec<u8>,
	pub stat: Stat,
}

impl Encode for GetDataResponse {
	fn encode(&self, buf: &mut BytesMut) {
		put_buffer(buf, &self.data);
		self.stat.encode(buf);
	}
}

impl Decode for GetDataResponse {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self {
			data: get_buffer(buf, "data")?,
			stat: Stat::decode(buf)?,
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetAclResponse {
	pub acl: Vec<Acl>,
	pub stat: Stat,
}

impl Encode for GetAclResponse {
	fn encode(&self, buf: &mut BytesMut) {
		put_acls(buf, &self.acl);
		self.stat.encode(buf);
	}
}

impl Decode for GetAclResponse {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self {
			acl: get_acls(buf)?,
			stat: Stat::decode(buf)?,
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetChildrenResponse {
	pub children: Vec<String>,
}

impl Encode for GetChildrenResponse {
	fn encode(&self, buf: &mut BytesMut) {
		put_strings(buf, &self.children);
	}
}

impl Decode for GetChildrenResponse {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self {
			children: get_vec(buf, "children", |b| get_string(b, "child"))?,
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetChildren2Response {
	pub children: Vec<String>,
	pub stat: Stat,
}

impl Encode for GetChildren2Response {
	fn encode(&self, buf: &mut BytesMut) {
		put_strings(buf, &self.children);
		self.stat.encode(buf);
	}
}

impl Decode for GetChildren2Response {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self {
			children: get_vec(buf, "children", |b| get_string(b, "child"))?,
			stat: Stat::decode(buf)?,
		})
	}
}

// ---------------------------------------------------------------------------
// Watcher notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
	None,
	NodeCreated,
	NodeDeleted,
	NodeDataChanged,
	NodeChildrenChanged,
}

impl EventType {
	pub fn from_code(code: i32) -> Result<Self, DecodeError> {
		Ok(match code {
			-1 => Self::None,
			1 => Self::NodeCreated,
			2 => Self::NodeDeleted,
			3 => Self::NodeDataChanged,
			4 => Self::NodeChildrenChanged,
			value => return Err(DecodeError::UnknownValue { what: "event type", value }),
		})
	}

	pub fn code(self) -> i32 {
		match self {
			Self::None => -1,
			Self::NodeCreated => 1,
			Self::NodeDeleted => 2,
			Self::NodeDataChanged => 3,
			Self::NodeChildrenChanged => 4,
		}
	}
}

/// Keeper state carried by watcher notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeeperState {
	Disconnected,
	SyncConnected,
	AuthFailed,
	ConnectedReadOnly,
	SaslAuthenticated,
	Expired,
	Closed,
}

impl KeeperState {
	pub fn from_code(code: i32) -> Result<Self, DecodeError> {
		Ok(match code {
			0 => Self::Disconnected,
			3 => Self::SyncConnected,
			4 => Self::AuthFailed,
			5 => Self::ConnectedReadOnly,
			6 => Self::SaslAuthenticated,
			-112 => Self::Expired,
			7 => Self::Closed,
			value => return Err(DecodeError::UnknownValue { what: "keeper state", value }),
		})
	}

	pub fn code(self) -> i32 {
		match self {
			Self::Disconnected => 0,
			Self::SyncConnected => 3,
			Self::AuthFailed => 4,
			Self::ConnectedReadOnly => 5,
			Self::SaslAuthenticated => 6,
			Self::Expired => -112,
			Self::Closed => 7,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherEvent {
	pub event_type: EventType,
	pub state: KeeperState,
	pub path: String,
}

impl Encode for WatcherEvent {
	fn encode(&self, buf: &mut BytesMut) {
		buf.put_i32(self.event_type.code());
		buf.put_i32(self.state.code());
		put_string(buf, &self.path);
	}
}

impl Decode for WatcherEvent {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
		Ok(Self {
			event_type: EventType::from_code(get_i32(buf, "event type")?)?,
			state: KeeperState::from_code(get_i32(buf, "keeper state")?)?,
			path: get_string(buf, "path")?,
		})
	}
}
