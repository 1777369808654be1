//! Requests between the caller and the reply.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::oneshot;
use zk_protocol::OpCode;

use crate::error::{Error, Result};
use crate::watches::WatchSpec;

pub(crate) type ResponseSink = oneshot::Sender<Result<Bytes>>;

/// One caller's request. Lives in the outbound queue, then the in-flight
/// table, and possibly the replay buffer, until exactly one result is sent.
pub(crate) struct Request {
	/// Issue order across the life of the client.
	pub ticket: u64,
	pub opcode: OpCode,
	pub payload: Bytes,
	pub sink: ResponseSink,
	pub replay_safe: bool,
	pub watch: Option<WatchSpec>,
	pub enqueued_at: Instant,
	/// Assigned when first written; kept when the request is replayed.
	pub xid: Option<i32>,
}

impl Request {
	pub(crate) fn new(ticket: u64, opcode: OpCode, payload: Bytes, replay_safe: bool, watch: Option<WatchSpec>) -> (Self, oneshot::Receiver<Result<Bytes>>) {
		let (sink, rx) = oneshot::channel();
		let request = Self {
			ticket,
			opcode,
			payload,
			sink,
			replay_safe,
			watch,
			enqueued_at: Instant::now(),
			xid: None,
		};
		(request, rx)
	}

	/// The caller stopped waiting (timed out or dropped its future).
	pub(crate) fn is_abandoned(&self) -> bool {
		self.sink.is_closed()
	}

	pub(crate) fn resolve(self, result: Result<Bytes>) {
		let _ = self.sink.send(result);
	}

	pub(crate) fn fail(self, err: Error) {
		self.resolve(Err(err));
	}
}

impl std::fmt::Debug for Request {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Request")
			.field("ticket", &self.ticket)
			.field("opcode", &self.opcode)
			.field("xid", &self.xid)
			.field("replay_safe", &self.replay_safe)
			.field("len", &self.payload.len())
			.finish_non_exhaustive()
	}
}

/// Work for the send loop ahead of the outbound queue.
pub(crate) enum Outbound {
	Request(Request),
	/// Frame with a reserved xid whose reply is not matched through the in-flight table.
	Control { xid: i32, opcode: OpCode, payload: Bytes },
}

/// Requests written to the current connection and not yet answered, by xid.
pub(crate) struct InFlightTable {
	entries: HashMap<i32, Request>,
	next_xid: i32,
}

impl InFlightTable {
	pub(crate) fn new() -> Self {
		Self::starting_at(1)
	}

	pub(crate) fn starting_at(next_xid: i32) -> Self {
		Self {
			entries: HashMap::new(),
			next_xid: next_xid.max(1),
		}
	}

	/// Inserts `request` and returns its xid.
	///
	/// A replayed request keeps its previous xid unless another entry now
	/// holds it.
	pub(crate) fn register(&mut self, mut request: Request) -> i32 {
		let xid = match request.xid {
			Some(xid) if !self.entries.contains_key(&xid) => xid,
			_ => self.allocate(),
		};
		request.xid = Some(xid);
		self.entries.insert(xid, request);
		xid
	}

	fn allocate(&mut self) -> i32 {
		loop {
			let xid = self.next_xid;
			self.next_xid = if xid == i32::MAX { 1 } else { xid + 1 };
			if !self.entries.contains_key(&xid) {
				return xid;
			}
		}
	}

	pub(crate) fn take(&mut self, xid: i32) -> Option<Request> {
		self.entries.remove(&xid)
	}

	/// Drops the entry for a caller that gave up, so a late reply is unmatched.
	pub(crate) fn abandon(&mut self, ticket: u64) -> Option<Request> {
		let xid = self.entries.iter().find(|(_, request)| request.ticket == ticket).map(|(xid, _)| *xid)?;
		self.entries.remove(&xid)
	}

	/// Removes every entry, oldest first.
	pub(crate) fn drain(&mut self) -> Vec<Request> {
		let mut drained: Vec<Request> = self.entries.drain().map(|(_, request)| request).collect();
		drained.sort_by_key(|request| request.ticket);
		drained
	}

	pub(crate) fn len(&self) -> usize {
		self.entries.len()
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}
