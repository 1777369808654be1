//! One ensemble member: an accept loop plus a task per client connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};
use zk_protocol::{AUTH_XID, AuthPacket, ConnectRequest, ConnectResponse, Decode, Encode, ErrorCode, Id, OpCode, PASSWORD_LEN, PING_XID, RequestHeader, SET_WATCHES_XID, SetWatches};
use zk_runtime::{FrameReader, FrameWriter, FramedConnection};

use crate::error::Result;
use crate::tree::{ConnHandle, Outgoing, Reply, SessionId};
use crate::{AuthRecord, Inner};

/// Per-member switches the test flips at runtime.
#[derive(Debug)]
pub(crate) struct Member {
	pub index: usize,
	pub unresponsive: AtomicBool,
}

pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
	let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Accepts connections until `stop` is raised.
pub(crate) async fn serve(inner: Arc<Inner>, member: Arc<Member>, listener: TcpListener, stop: watch::Receiver<bool>) {
	let mut accept_stop = stop.clone();
	loop {
		let (stream, peer) = tokio::select! {
			_ = stopped(&mut accept_stop) => break,
			accepted = listener.accept() => match accepted {
				Ok(accepted) => accepted,
				Err(err) => {
					warn!(target = "zk.ensemble", server = member.index, error = %err, "accept failed");
					continue;
				}
			},
		};
		let _ = stream.set_nodelay(true);
		let conn = FramedConnection::new(stream, peer.to_string(), inner.max_frame_len);
		let inner = Arc::clone(&inner);
		let member = Arc::clone(&member);
		let mut stop = stop.clone();
		tokio::spawn(async move {
			tokio::select! {
				_ = stopped(&mut stop) => {}
				result = connection(&inner, &member, conn) => {
					if let Err(err) = result {
						debug!(target = "zk.ensemble", server = member.index, %peer, error = %err, "connection ended");
					}
				}
			}
		});
	}
	debug!(target = "zk.ensemble", server = member.index, "server stopped");
}

async fn connection(inner: &Inner, member: &Member, mut conn: FramedConnection) -> Result<()> {
	let mut frame = conn.read().await?;
	let request = ConnectRequest::decode(&mut frame)?;

	let conn_id = inner.next_conn_id();
	let (outbox, mut outgoing) = mpsc::unbounded_channel();
	let handle = ConnHandle { id: conn_id, outbox };
	let response = handshake(inner, &request, handle.clone());

	let mut buf = bytes::BytesMut::new();
	response.encode(&mut buf);
	conn.write(&buf).await?;
	if response.is_expired() {
		debug!(target = "zk.ensemble", server = member.index, session_id = format_args!("{:#x}", request.session_id), "refused expired session");
		return Ok(());
	}

	let session = response.session_id;
	let (reader, writer) = conn.into_split();
	let result = tokio::select! {
		result = read_requests(inner, member, reader, session, &handle) => result,
		result = write_frames(writer, &mut outgoing) => result,
	};
	inner.tree.lock().detach(session, conn_id);
	result
}

fn handshake(inner: &Inner, request: &ConnectRequest, handle: ConnHandle) -> ConnectResponse {
	let requested = Duration::from_millis(request.timeout_ms.max(0) as u64);
	let mut tree = inner.tree.lock();

	if request.session_id == 0 {
		let timeout = requested.clamp(inner.min_session_timeout, inner.max_session_timeout);
		let (session_id, password) = tree.open_session(timeout, handle);
		return ConnectResponse {
			protocol_version: 0,
			timeout_ms: timeout.as_millis() as i32,
			session_id,
			password,
			read_only: false,
		};
	}

	match tree.resume_session(request.session_id, &request.password, handle) {
		Some(timeout) => ConnectResponse {
			protocol_version: 0,
			timeout_ms: timeout.as_millis() as i32,
			session_id: request.session_id,
			password: request.password.clone(),
			read_only: false,
		},
		None => ConnectResponse {
			protocol_version: 0,
			timeout_ms: 0,
			session_id: 0,
			password: vec![0; PASSWORD_LEN],
			read_only: false,
		},
	}
}

async fn read_requests(inner: &Inner, member: &Member, mut reader: FrameReader, session: SessionId, handle: &ConnHandle) -> Result<()> {
	loop {
		let mut frame = reader.read().await?;
		if member.unresponsive.load(Ordering::SeqCst) {
			trace!(target = "zk.ensemble", server = member.index, "dropping request while unresponsive");
			continue;
		}
		let header = RequestHeader::decode(&mut frame)?;
		let opcode = OpCode::from_code(header.opcode);
		let mut tree = inner.tree.lock();
		tree.touch(session);

		let reply = match opcode {
			Some(OpCode::Ping) => empty_reply(tree.zxid(), ErrorCode::Ok).frame(PING_XID),
			Some(OpCode::Auth) => {
				let packet = AuthPacket::decode(&mut frame)?;
				let accepted = authenticate(inner, member, session, &packet);
				if accepted && packet.scheme == "digest" {
					let credential = String::from_utf8_lossy(&packet.auth);
					let user = credential.split_once(':').map_or(&*credential, |(user, _)| user);
					tree.add_identity(
						session,
						Id {
							scheme: "digest".into(),
							id: user.to_string(),
						},
					);
				}
				let code = if accepted { ErrorCode::Ok } else { ErrorCode::AuthFailed };
				empty_reply(tree.zxid(), code).frame(AUTH_XID)
			}
			Some(OpCode::SetWatches) => {
				tree.set_watches(session, SetWatches::decode(&mut frame)?);
				empty_reply(tree.zxid(), ErrorCode::Ok).frame(SET_WATCHES_XID)
			}
			Some(OpCode::CloseSession) => {
				handle.send(empty_reply(tree.zxid(), ErrorCode::Ok).frame(header.xid));
				// Queues a close behind the reply.
				tree.close_session(session);
				continue;
			}
			Some(opcode) => tree.apply(session, opcode, &mut frame).frame(header.xid),
			None => empty_reply(tree.zxid(), ErrorCode::Unimplemented).frame(header.xid),
		};
		handle.send(reply);
	}
}

fn authenticate(inner: &Inner, member: &Member, session: SessionId, packet: &AuthPacket) -> bool {
	let accepted = !inner.rejected.lock().contains(&(packet.scheme.clone(), packet.auth.clone()));
	inner.auth_log.lock().push(AuthRecord {
		server: member.index,
		session_id: session,
		scheme: packet.scheme.clone(),
		accepted,
	});
	debug!(target = "zk.ensemble", server = member.index, scheme = %packet.scheme, accepted, "auth packet");
	accepted
}

fn empty_reply(zxid: i64, err: ErrorCode) -> Reply {
	Reply {
		zxid,
		err,
		body: bytes::BytesMut::new(),
	}
}

async fn write_frames(mut writer: FrameWriter, outgoing: &mut mpsc::UnboundedReceiver<Outgoing>) -> Result<()> {
	while let Some(next) = outgoing.recv().await {
		match next {
			Outgoing::Frame(frame) => write(&mut writer, frame).await?,
			Outgoing::Close => break,
		}
	}
	writer.close().await;
	Ok(())
}

async fn write(writer: &mut FrameWriter, frame: Bytes) -> Result<()> {
	writer.write(&frame).await?;
	Ok(())
}
