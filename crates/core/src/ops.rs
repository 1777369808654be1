//! Request types and their encode/decode contract.
//!
//! An [`Operation`] turns itself into a request body and turns the reply body
//! back into a typed result. The multiplexer only ever sees opaque bytes plus
//! the opcode, the replay flag and an optional watch.

use bytes::{Bytes, BytesMut};
use zk_protocol::{
	Acl, CreateFlags, CreateRequest, Decode, DeleteRequest, Encode, ErrorCode, GetAclResponse, GetChildren2Response, GetChildrenResponse, GetDataResponse, OpCode,
	PathRequest, PathResponse, PathWatchRequest, SetAclRequest, SetDataRequest, Stat, StatResponse,
};

use crate::error::{Error, Result};
use crate::watches::WatchKind;

/// Matches any node version in conditional updates and deletes.
pub const ANY_VERSION: i32 = -1;

pub trait Operation: Send + Sync {
	type Output: Send + 'static;

	fn opcode(&self) -> OpCode;

	fn encode(&self, buf: &mut BytesMut);

	/// Expected body size, used to pre-size the encode buffer.
	fn estimated_size(&self) -> usize {
		64
	}

	/// Whether the request may be resent after a connection drops with the
	/// request unanswered.
	fn replay_safe(&self) -> bool {
		self.opcode().is_read_only()
	}

	/// Watch this request asks the server to set.
	fn watch(&self) -> Option<(&str, WatchKind)> {
		None
	}

	fn decode(&self, body: Bytes) -> Result<Self::Output>;

	/// Maps a server error code to a result. Most operations just fail.
	fn on_error(&self, code: ErrorCode) -> Result<Self::Output> {
		Err(Error::Operation(code))
	}
}

/// Checks that `path` is absolute and normalized.
///
/// Sequential creates may end in `/`; the server appends the counter.
pub fn validate_path(path: &str, sequential: bool) -> Result<()> {
	let invalid = |reason: &str| Err(Error::InvalidArgument(format!("invalid path {path:?}: {reason}")));

	if !path.starts_with('/') {
		return invalid("must start with '/'");
	}
	if path.contains('\0') {
		return invalid("contains a null character");
	}
	if path == "/" {
		return if sequential { invalid("cannot create the root") } else { Ok(()) };
	}

	let body = if sequential { path.strip_suffix('/').unwrap_or(path) } else { path };
	if body.ends_with('/') {
		return invalid("must not end with '/'");
	}
	for segment in body[1..].split('/') {
		match segment {
			"" => return invalid("empty segment"),
			"." | ".." => return invalid("relative segment"),
			_ => {}
		}
	}
	Ok(())
}

fn encode_record<R: Encode>(record: &R, buf: &mut BytesMut) {
	record.encode(buf);
}

#[derive(Debug, Clone)]
pub struct Create {
	request: CreateRequest,
}

impl Create {
	pub fn new(path: impl Into<String>, data: impl Into<Vec<u8>>, flags: CreateFlags, acl: Vec<Acl>) -> Result<Self> {
		let path = path.into();
		validate_path(&path, flags.is_sequential())?;
		if acl.is_empty() {
			return Err(Error::InvalidArgument("create requires at least one ACL entry".into()));
		}
		Ok(Self {
			request: CreateRequest {
				path,
				data: data.into(),
				acl,
				flags,
			},
		})
	}
}

impl Operation for Create {
	type Output = String;

	fn opcode(&self) -> OpCode {
		OpCode::Create
	}

	fn encode(&self, buf: &mut BytesMut) {
		encode_record(&self.request, buf);
	}

	fn estimated_size(&self) -> usize {
		32 + self.request.path.len() + self.request.data.len() + self.request.acl.len() * 32
	}

	fn decode(&self, mut body: Bytes) -> Result<String> {
		Ok(PathResponse::decode(&mut body)?.path)
	}
}

#[derive(Debug, Clone)]
pub struct Delete {
	request: DeleteRequest,
}

impl Delete {
	pub fn new(path: impl Into<String>, version: i32) -> Result<Self> {
		let path = path.into();
		validate_path(&path, false)?;
		Ok(Self {
			request: DeleteRequest { path, version },
		})
	}
}

impl Operation for Delete {
	type Output = ();

	fn opcode(&self) -> OpCode {
		OpCode::Delete
	}

	fn encode(&self, buf: &mut BytesMut) {
		encode_record(&self.request, buf);
	}

	fn decode(&self, _body: Bytes) -> Result<()> {
		Ok(())
	}
}

/// Stat of a node, or `None` when it does not exist.
#[derive(Debug, Clone)]
pub struct Exists {
	request: PathWatchRequest,
}

impl Exists {
	pub fn new(path: impl Into<String>) -> Result<Self> {
		Ok(Self {
			request: watchable(path.into())?,
		})
	}

	pub fn watched(mut self) -> Self {
		self.request.watch = true;
		self
	}
}

impl Operation for Exists {
	type Output = Option<Stat>;

	fn opcode(&self) -> OpCode {
		OpCode::Exists
	}

	fn encode(&self, buf: &mut BytesMut) {
		encode_record(&self.request, buf);
	}

	fn watch(&self) -> Option<(&str, WatchKind)> {
		self.request.watch.then_some((self.request.path.as_str(), WatchKind::Exist))
	}

	fn decode(&self, mut body: Bytes) -> Result<Option<Stat>> {
		Ok(Some(StatResponse::decode(&mut body)?.stat))
	}

	fn on_error(&self, code: ErrorCode) -> Result<Option<Stat>> {
		match code {
			ErrorCode::NoNode => Ok(None),
			code => Err(Error::Operation(code)),
		}
	}
}

#[derive(Debug, Clone)]
pub struct GetData {
	request: PathWatchRequest,
}

impl GetData {
	pub fn new(path: impl Into<String>) -> Result<Self> {
		Ok(Self {
			request: watchable(path.into())?,
		})
	}

	pub fn watched(mut self) -> Self {
		self.request.watch = true;
		self
	}
}

impl Operation for GetData {
	type Output = (Vec<u8>, Stat);

	fn opcode(&self) -> OpCode {
		OpCode::GetData
	}

	fn encode(&self, buf: &mut BytesMut) {
		encode_record(&self.request, buf);
	}

	fn watch(&self) -> Option<(&str, WatchKind)> {
		self.request.watch.then_some((self.request.path.as_str(), WatchKind::Data))
	}

	fn decode(&self, mut body: Bytes) -> Result<(Vec<u8>, Stat)> {
		let response = GetDataResponse::decode(&mut body)?;
		Ok((response.data, response.stat))
	}
}

#[derive(Debug, Clone)]
pub struct SetData {
	request: SetDataRequest,
}

impl SetData {
	pub fn new(path: impl Into<String>, data: impl Into<Vec<u8>>, version: i32) -> Result<Self> {
		let path = path.into();
		validate_path(&path, false)?;
		Ok(Self {
			request: SetDataRequest {
				path,
				data: data.into(),
				version,
			},
		})
	}
}

impl Operation for SetData {
	type Output = Stat;

	fn opcode(&self) -> OpCode {
		OpCode::SetData
	}

	fn encode(&self, buf: &mut BytesMut) {
		encode_record(&self.request, buf);
	}

	fn estimated_size(&self) -> usize {
		16 + self.request.path.len() + self.request.data.len()
	}

	fn decode(&self, mut body: Bytes) -> Result<Stat> {
		Ok(StatResponse::decode(&mut body)?.stat)
	}
}

#[derive(Debug, Clone)]
pub struct GetChildren {
	request: PathWatchRequest,
}

impl GetChildren {
	pub fn new(path: impl Into<String>) -> Result<Self> {
		Ok(Self {
			request: watchable(path.into())?,
		})
	}

	pub fn watched(mut self) -> Self {
		self.request.watch = true;
		self
	}
}

impl Operation for GetChildren {
	type Output = Vec<String>;

	fn opcode(&self) -> OpCode {
		OpCode::GetChildren
	}

	fn encode(&self, buf: &mut BytesMut) {
		encode_record(&self.request, buf);
	}

	fn watch(&self) -> Option<(&str, WatchKind)> {
		self.request.watch.then_some((self.request.path.as_str(), WatchKind::Child))
	}

	fn decode(&self, mut body: Bytes) -> Result<Vec<String>> {
		Ok(GetChildrenResponse::decode(&mut body)?.children)
	}
}

/// Children plus the parent's stat.
#[derive(Debug, Clone)]
pub struct GetChildren2 {
	request: PathWatchRequest,
}

impl GetChildren2 {
	pub fn new(path: impl Into<String>) -> Result<Self> {
		Ok(Self {
			request: watchable(path.into())?,
		})
	}

	pub fn watched(mut self) -> Self {
		self.request.watch = true;
		self
	}
}

impl Operation for GetChildren2 {
	type Output = (Vec<String>, Stat);

	fn opcode(&self) -> OpCode {
		OpCode::GetChildren2
	}

	fn encode(&self, buf: &mut BytesMut) {
		encode_record(&self.request, buf);
	}

	fn watch(&self) -> Option<(&str, WatchKind)> {
		self.request.watch.then_some((self.request.path.as_str(), WatchKind::Child))
	}

	fn decode(&self, mut body: Bytes) -> Result<(Vec<String>, Stat)> {
		let response = GetChildren2Response::decode(&mut body)?;
		Ok((response.children, response.stat))
	}
}

#[derive(Debug, Clone)]
pub struct GetAcl {
	request: PathRequest,
}

impl GetAcl {
	pub fn new(path: impl Into<String>) -> Result<Self> {
		let path = path.into();
		validate_path(&path, false)?;
		Ok(Self {
			request: PathRequest { path },
		})
	}
}

impl Operation for GetAcl {
	type Output = (Vec<Acl>, Stat);

	fn opcode(&self) -> OpCode {
		OpCode::GetAcl
	}

	fn encode(&self, buf: &mut BytesMut) {
		encode_record(&self.request, buf);
	}

	fn decode(&self, mut body: Bytes) -> Result<(Vec<Acl>, Stat)> {
		let response = GetAclResponse::decode(&mut body)?;
		Ok((response.acl, response.stat))
	}
}

#[derive(Debug, Clone)]
pub struct SetAcl {
	request: SetAclRequest,
}

impl SetAcl {
	pub fn new(path: impl Into<String>, acl: Vec<Acl>, version: i32) -> Result<Self> {
		let path = path.into();
		validate_path(&path, false)?;
		if acl.is_empty() {
			return Err(Error::InvalidArgument("ACL must not be empty".into()));
		}
		Ok(Self {
			request: SetAclRequest { path, acl, version },
		})
	}
}

impl Operation for SetAcl {
	type Output = Stat;

	fn opcode(&self) -> OpCode {
		OpCode::SetAcl
	}

	fn encode(&self, buf: &mut BytesMut) {
		encode_record(&self.request, buf);
	}

	fn decode(&self, mut body: Bytes) -> Result<Stat> {
		Ok(StatResponse::decode(&mut body)?.stat)
	}
}

/// Waits until the connected server has caught up with the leader for `path`.
#[derive(Debug, Clone)]
pub struct SyncPath {
	request: PathRequest,
}

impl SyncPath {
	pub fn new(path: impl Into<String>) -> Result<Self> {
		let path = path.into();
		validate_path(&path, false)?;
		Ok(Self {
			request: PathRequest { path },
		})
	}
}

impl Operation for SyncPath {
	type Output = String;

	fn opcode(&self) -> OpCode {
		OpCode::Sync
	}

	fn encode(&self, buf: &mut BytesMut) {
		encode_record(&self.request, buf);
	}

	fn decode(&self, mut body: Bytes) -> Result<String> {
		Ok(PathResponse::decode(&mut body)?.path)
	}
}

fn watchable(path: String) -> Result<PathWatchRequest> {
	validate_path(&path, false)?;
	Ok(PathWatchRequest { path, watch: false })
}
