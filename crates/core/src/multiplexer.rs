//! Send and receive loops for one live connection.
//!
//! Both loops run inside the session task and stop together: the first one
//! to fail ends the connection. The send loop registers each request in the
//! in-flight table before writing it, so the receive loop can always match
//! the reply.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};
use zk_protocol::{AUTH_XID, Decode, Encode, ErrorCode, KeeperState, OpCode, PING_XID, ReplyHeader, RequestHeader, SET_WATCHES_XID, WATCHER_EVENT_XID, WatcherEvent};
use zk_runtime::{FrameReader, FrameWriter};

use crate::error::{Error, Result};
use crate::events::{Event, NodeEvent, SessionEvent};
use crate::pending::{Outbound, Request};
use crate::session::{SessionState, Shared};
use crate::watches::armed_kind;

/// Unanswered pings tolerated before the connection is declared dead.
const MAX_MISSED_PINGS: u32 = 2;

/// Writes requests in the order priority lane, replay buffer, outbound queue,
/// and a ping every `ping_interval`.
pub(crate) async fn send_loop(shared: &Shared, mut writer: FrameWriter, ping_interval: Duration) -> Result<()> {
	let mut queue = shared.queue_rx.lock().await;
	let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
	ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
	let mut frame = BytesMut::new();

	loop {
		while let Some(outbound) = next_outbound(shared) {
			if let Some((xid, opcode, payload)) = prepare(shared, outbound) {
				write_frame(&mut writer, &mut frame, xid, opcode, &payload).await?;
			}
		}

		tokio::select! {
			biased;
			_ = shared.wake.notified() => {}
			_ = ping.tick() => {
				let missed = {
					let mut core = shared.core.lock();
					let missed = core.pings_outstanding;
					core.pings_outstanding += 1;
					missed
				};
				if missed >= MAX_MISSED_PINGS {
					return Err(Error::Transport(format!("{missed} pings unanswered")));
				}
				write_frame(&mut writer, &mut frame, PING_XID, OpCode::Ping, &[]).await?;
			}
			request = queue.recv() => match request {
				Some(request) => {
					if let Some((xid, opcode, payload)) = register(shared, request) {
						write_frame(&mut writer, &mut frame, xid, opcode, &payload).await?;
					}
				}
				None => return Ok(()),
			},
		}
	}
}

fn next_outbound(shared: &Shared) -> Option<Outbound> {
	let mut core = shared.core.lock();
	core.priority.pop_front().or_else(|| core.replay.pop_front().map(Outbound::Request))
}

fn prepare(shared: &Shared, outbound: Outbound) -> Option<(i32, OpCode, Bytes)> {
	match outbound {
		Outbound::Control { xid, opcode, payload } => Some((xid, opcode, payload)),
		Outbound::Request(request) => register(shared, request),
	}
}

/// Moves `request` into the in-flight table, unless its caller gave up.
fn register(shared: &Shared, request: Request) -> Option<(i32, OpCode, Bytes)> {
	if request.is_abandoned() {
		trace!(target = "zk.mux", ticket = request.ticket, "skipping abandoned request");
		return None;
	}
	let opcode = request.opcode;
	let payload = request.payload.clone();
	let queued = request.enqueued_at.elapsed();
	let xid = shared.core.lock().in_flight.register(request);
	trace!(target = "zk.mux", xid, ?opcode, ?queued, "request registered");
	Some((xid, opcode, payload))
}

async fn write_frame(writer: &mut FrameWriter, frame: &mut BytesMut, xid: i32, opcode: OpCode, payload: &[u8]) -> Result<()> {
	frame.clear();
	RequestHeader { xid, opcode: opcode.code() }.encode(frame);
	frame.extend_from_slice(payload);
	writer.write(&frame[..]).await?;
	Ok(())
}

/// Reads frames until the connection fails or stays silent for `read_timeout`.
pub(crate) async fn recv_loop(shared: &Shared, mut reader: FrameReader, read_timeout: Duration) -> Result<()> {
	loop {
		let frame = match tokio::time::timeout(read_timeout, reader.read()).await {
			Ok(frame) => frame?,
			Err(_) => return Err(Error::Transport(format!("nothing received for {read_timeout:?}"))),
		};
		handle_frame(shared, frame)?;
	}
}

/// Routes one reply frame. Fails only when the connection must end.
pub(crate) fn handle_frame(shared: &Shared, mut frame: Bytes) -> Result<()> {
	let header = ReplyHeader::decode(&mut frame)?;
	if header.zxid > 0 {
		shared.core.lock().last_zxid = header.zxid;
	}
	let code = ErrorCode::from_code(header.err);

	match header.xid {
		WATCHER_EVENT_XID => handle_notification(shared, WatcherEvent::decode(&mut frame)?),
		PING_XID => {
			shared.core.lock().pings_outstanding = 0;
			trace!(target = "zk.mux", "ping answered");
			Ok(())
		}
		AUTH_XID => {
			handle_auth_reply(shared, code);
			Ok(())
		}
		SET_WATCHES_XID => {
			debug!(target = "zk.mux", %code, "watches re-registered");
			Ok(())
		}
		xid => {
			complete(shared, xid, code, frame);
			Ok(())
		}
	}
}

fn complete(shared: &Shared, xid: i32, code: ErrorCode, body: Bytes) {
	let mut core = shared.core.lock();
	let Some(mut request) = core.in_flight.take(xid) else {
		drop(core);
		debug!(target = "zk.mux", xid, %code, "discarding reply with no pending request");
		return;
	};
	if let Some(watch) = request.watch.take() {
		if let Some(kind) = armed_kind(watch.kind, code) {
			core.watches.arm(watch, kind);
		}
	}
	drop(core);

	trace!(target = "zk.mux", xid, opcode = ?request.opcode, %code, elapsed = ?request.enqueued_at.elapsed(), "reply matched");
	let result = if code.is_ok() { Ok(body) } else { Err(Error::Operation(code)) };
	request.resolve(result);
}

fn handle_notification(shared: &Shared, event: WatcherEvent) -> Result<()> {
	let Some(kind) = NodeEvent::from_event_type(event.event_type) else {
		if event.state != KeeperState::AuthFailed {
			debug!(target = "zk.events", state = ?event.state, "session notification");
			return Ok(());
		}
		let server = {
			let mut core = shared.core.lock();
			if !core.state.is_terminal() {
				core.state = SessionState::AuthFailed;
			}
			core.server.clone()
		};
		warn!(target = "zk.session", server = ?server, "server rejected the session's credentials");
		shared.events.session(SessionEvent::AuthFailed, server);
		return Err(Error::AuthFailed);
	};

	let fired = shared.core.lock().watches.fire(kind, &event.path);
	debug!(target = "zk.events", ?kind, path = %event.path, fired, "node event");
	shared.events.publish(Event::Node { kind, path: event.path });
	Ok(())
}

fn handle_auth_reply(shared: &Shared, code: ErrorCode) {
	let (waiter, server) = {
		let mut core = shared.core.lock();
		(core.auth_waiters.pop_front(), core.server.clone())
	};
	let result = match code {
		ErrorCode::Ok => Ok(()),
		ErrorCode::AuthFailed => Err(Error::AuthFailed),
		code => Err(Error::Operation(code)),
	};
	// A rejected credential leaves the session open, so report it before the waiter sees it.
	if code == ErrorCode::AuthFailed {
		warn!(target = "zk.session", server = ?server, solicited = waiter.is_some(), "server rejected a credential");
		shared.events.session(SessionEvent::AuthFailed, server);
	}
	match waiter {
		Some(waiter) => {
			let _ = waiter.send(result);
		}
		None => debug!(target = "zk.mux", %code, "unsolicited auth reply"),
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use bytes::BufMut;
	use zk_protocol::{EventType, GetDataResponse, Stat};

	use super::*;
	use crate::config::ClientConfig;
	use crate::events::EventStream;
	use crate::reauth::DefaultReauthenticator;
	use crate::watches::{self, WatchKind};

	fn shared() -> (Arc<Shared>, EventStream) {
		let (dialer, _controller) = zk_runtime::fake_transport::FakeTransportBuilder::new().build();
		let config = ClientConfig {
			servers: vec!["a:1".into()],
			..ClientConfig::default()
		};
		Shared::new(config, Arc::new(dialer), Arc::new(DefaultReauthenticator))
	}

	fn reply(xid: i32, zxid: i64, err: ErrorCode, body: impl Encode) -> Bytes {
		let mut buf = BytesMut::new();
		ReplyHeader { xid, zxid, err: err.code() }.encode(&mut buf);
		body.encode(&mut buf);
		buf.freeze()
	}

	struct Empty;

	impl Encode for Empty {
		fn encode(&self, _buf: &mut BytesMut) {}
	}

	fn notification(event_type: EventType, state: KeeperState, path: &str) -> Bytes {
		reply(
			WATCHER_EVENT_XID,
			-1,
			ErrorCode::Ok,
			WatcherEvent {
				event_type,
				state,
				path: path.into(),
			},
		)
	}

	#[tokio::test]
	async fn replies_resolve_their_request_and_advance_the_zxid() {
		let (shared, _events) = shared();
		let (request, rx) = Request::new(1, OpCode::GetData, Bytes::new(), true, None);
		let xid = register(&shared, request).unwrap().0;

		let body = GetDataResponse {
			data: b"v".to_vec(),
			stat: Stat::default(),
		};
		handle_frame(&shared, reply(xid, 17, ErrorCode::Ok, body)).unwrap();

		let mut reply_body = rx.await.unwrap().unwrap();
		assert_eq!(GetDataResponse::decode(&mut reply_body).unwrap().data, b"v");
		assert_eq!(shared.core.lock().last_zxid, 17);
		assert!(shared.core.lock().in_flight.is_empty());
	}

	#[tokio::test]
	async fn server_errors_reach_the_caller() {
		let (shared, _events) = shared();
		let (request, rx) = Request::new(1, OpCode::Delete, Bytes::new(), false, None);
		let xid = register(&shared, request).unwrap().0;

		handle_frame(&shared, reply(xid, 0, ErrorCode::NotEmpty, Empty)).unwrap();
		assert_eq!(rx.await.unwrap(), Err(Error::Operation(ErrorCode::NotEmpty)));
	}

	#[tokio::test]
	async fn unmatched_replies_are_discarded() {
		let (shared, _events) = shared();
		handle_frame(&shared, reply(999, 0, ErrorCode::Ok, Empty)).unwrap();
	}

	#[tokio::test]
	async fn abandoned_requests_are_not_registered() {
		let (shared, _events) = shared();
		let (request, rx) = Request::new(1, OpCode::GetData, Bytes::new(), true, None);
		drop(rx);
		assert!(register(&shared, request).is_none());
		assert!(shared.core.lock().in_flight.is_empty());
	}

	#[tokio::test]
	async fn missing_node_arms_an_existence_watch() {
		let (shared, mut events) = shared();
		let (spec, watch) = watches::channel("/later", WatchKind::Exist);
		let (request, rx) = Request::new(1, OpCode::Exists, Bytes::new(), true, Some(spec));
		let xid = register(&shared, request).unwrap().0;

		handle_frame(&shared, reply(xid, 0, ErrorCode::NoNode, Empty)).unwrap();
		assert_eq!(rx.await.unwrap(), Err(Error::Operation(ErrorCode::NoNode)));

		handle_frame(&shared, notification(EventType::NodeCreated, KeeperState::SyncConnected, "/later")).unwrap();
		assert_eq!(watch.recv().await.unwrap().kind, NodeEvent::Created);
		assert_eq!(
			events.recv().await,
			Some(Event::Node {
				kind: NodeEvent::Created,
				path: "/later".into(),
			})
		);
	}

	#[tokio::test]
	async fn auth_failed_notification_is_terminal() {
		let (shared, mut events) = shared();
		let err = handle_frame(&shared, notification(EventType::None, KeeperState::AuthFailed, "")).unwrap_err();
		assert_eq!(err, Error::AuthFailed);
		assert_eq!(shared.state(), SessionState::AuthFailed);
		assert_eq!(events.recv().await.unwrap().session(), Some(SessionEvent::AuthFailed));
	}

	#[tokio::test]
	async fn auth_replies_complete_waiters_in_order() {
		let (shared, mut events) = shared();
		let (first_tx, first) = tokio::sync::oneshot::channel();
		let (second_tx, second) = tokio::sync::oneshot::channel();
		shared.core.lock().auth_waiters.extend([first_tx, second_tx]);

		handle_frame(&shared, reply(AUTH_XID, 0, ErrorCode::Ok, Empty)).unwrap();
		assert!(events.try_recv().is_none());
		handle_frame(&shared, reply(AUTH_XID, 0, ErrorCode::AuthFailed, Empty)).unwrap();
		assert_eq!(first.await.unwrap(), Ok(()));
		assert_eq!(second.await.unwrap(), Err(Error::AuthFailed));

		// Rejection is reported without ending the session.
		assert_eq!(events.try_recv().and_then(|event| event.session()), Some(SessionEvent::AuthFailed));
		assert!(!shared.state().is_terminal());
	}

	#[tokio::test]
	async fn ping_replies_reset_the_missed_count() {
		let (shared, _events) = shared();
		shared.core.lock().pings_outstanding = 2;
		handle_frame(&shared, reply(PING_XID, 0, ErrorCode::Ok, Empty)).unwrap();
		assert_eq!(shared.core.lock().pings_outstanding, 0);
	}

	#[tokio::test]
	async fn garbage_frames_are_protocol_errors() {
		let (shared, _events) = shared();
		let mut buf = BytesMut::new();
		buf.put_i32(3);
		assert!(matches!(handle_frame(&shared, buf.freeze()), Err(Error::Protocol(_))));
	}
}
