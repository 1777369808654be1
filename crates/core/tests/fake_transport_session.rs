//! Session behavior against a scripted server on the in-memory transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::time::timeout;
use zk::ops::{self, ANY_VERSION};
use zk::{Client, DefaultReauthenticator, Error, ErrorCode, Event, EventStream, ReauthContext, ReauthFuture, Reauthenticator, ReplayPolicy, SessionEvent, SessionState};
use zk_protocol::{
	AUTH_XID, AuthPacket, ConnectRequest, ConnectResponse, Decode, Encode, EventType, GetDataResponse, KeeperState, OpCode, PING_XID, ReplyHeader, RequestHeader, Stat, StatResponse,
	WATCHER_EVENT_XID, WatcherEvent,
};
use zk_runtime::fake_transport::{FakePeer, FakeTransportBuilder, FakeTransportController};

const WAIT: Duration = Duration::from_secs(5);

struct NoBody;

impl Encode for NoBody {
	fn encode(&self, _buf: &mut BytesMut) {}
}

async fn accept(controller: &mut FakeTransportController) -> FakePeer {
	timeout(WAIT, controller.accept()).await.expect("client should dial").expect("dialer alive")
}

/// Answers the handshake and returns what the client asked for.
async fn handshake(peer: &mut FakePeer, session_id: i64, timeout_ms: i32) -> ConnectRequest {
	let mut frame = timeout(WAIT, peer.conn.read()).await.expect("handshake frame").unwrap();
	let request = ConnectRequest::decode(&mut frame).unwrap();

	let mut buf = BytesMut::new();
	ConnectResponse {
		protocol_version: 0,
		timeout_ms,
		session_id,
		password: vec![7; 16],
		read_only: false,
	}
	.encode(&mut buf);
	peer.conn.write(&buf).await.unwrap();
	request
}

/// Next request frame, skipping keep-alive pings.
async fn next_request(peer: &mut FakePeer) -> (RequestHeader, Bytes) {
	loop {
		let mut frame = timeout(WAIT, peer.conn.read()).await.expect("request frame").unwrap();
		let header = RequestHeader::decode(&mut frame).unwrap();
		if header.xid != PING_XID {
			return (header, frame);
		}
	}
}

async fn reply(peer: &mut FakePeer, xid: i32, err: ErrorCode, body: impl Encode) {
	let mut buf = BytesMut::new();
	ReplyHeader { xid, zxid: 10, err: err.code() }.encode(&mut buf);
	body.encode(&mut buf);
	peer.conn.write(&buf).await.unwrap();
}

async fn wait_for(events: &mut EventStream, wanted: SessionEvent) -> Option<String> {
	timeout(WAIT, async {
		loop {
			match events.recv().await {
				Some(Event::Session { state, server }) if state == wanted => return server,
				Some(_) => continue,
				None => panic!("event stream ended while waiting for {wanted:?}"),
			}
		}
	})
	.await
	.unwrap_or_else(|_| panic!("timed out waiting for {wanted:?}"))
}

fn data_reply(data: &[u8]) -> GetDataResponse {
	GetDataResponse {
		data: data.to_vec(),
		stat: Stat::default(),
	}
}

#[tokio::test]
async fn close_with_a_saturated_queue_returns_promptly() {
	let (dialer, mut controller) = FakeTransportBuilder::new().build();
	let (client, mut events) = Client::builder()
		.servers(["a:1"])
		.connect_timeout(Duration::from_secs(30))
		.send_queue_capacity(4)
		.dialer(dialer)
		.connect()
		.await
		.unwrap();

	// Accept the dial but never answer the handshake, so no send loop ever runs.
	let _peer = accept(&mut controller).await;

	let callers: Vec<_> = (0..8)
		.map(|i| {
			let client = client.clone();
			tokio::spawn(async move { client.get(&format!("/n{i}")).await })
		})
		.collect();
	tokio::time::sleep(Duration::from_millis(50)).await;

	let started = Instant::now();
	timeout(Duration::from_secs(3), client.close()).await.expect("close must not hang");
	assert!(started.elapsed() < Duration::from_secs(3));

	for caller in callers {
		let result = timeout(Duration::from_secs(3), caller).await.expect("caller released").unwrap();
		assert_eq!(result, Err(Error::Closed));
	}
	assert_eq!(client.state(), SessionState::Closed);
	assert_eq!(client.get("/after").await, Err(Error::Closed));

	let mut last = None;
	while let Some(event) = events.recv().await {
		last = Some(event);
	}
	assert_eq!(last.and_then(|event| event.session()), Some(SessionEvent::Closed));
}

#[tokio::test]
async fn close_is_idempotent_and_sends_close_session() {
	let (dialer, mut controller) = FakeTransportBuilder::new().build();
	let (client, mut events) = Client::builder().servers(["a:1"]).dialer(dialer).connect().await.unwrap();
	let mut peer = accept(&mut controller).await;
	handshake(&mut peer, 0x51, 30_000).await;
	wait_for(&mut events, SessionEvent::Connected).await;

	let closer = {
		let client = client.clone();
		tokio::spawn(async move { client.close().await })
	};
	let (header, _) = next_request(&mut peer).await;
	assert_eq!(header.opcode, OpCode::CloseSession.code());
	reply(&mut peer, header.xid, ErrorCode::Ok, NoBody).await;

	timeout(WAIT, closer).await.unwrap().unwrap();
	timeout(WAIT, client.close()).await.expect("second close returns");
	wait_for(&mut events, SessionEvent::Closed).await;
}

#[tokio::test]
async fn handshake_carries_the_session_timeout_and_a_blank_password() {
	let (dialer, mut controller) = FakeTransportBuilder::new().build();
	let (client, mut events) = Client::builder()
		.servers(["a:1"])
		.session_timeout(Duration::from_millis(4000))
		.dialer(dialer)
		.connect()
		.await
		.unwrap();
	let mut peer = accept(&mut controller).await;

	let request = handshake(&mut peer, 0x77, 4000).await;
	assert_eq!(request.session_id, 0);
	assert_eq!(request.timeout_ms, 4000);
	assert_eq!(request.password, vec![0; 16]);

	assert_eq!(wait_for(&mut events, SessionEvent::Connected).await.as_deref(), Some("a:1"));
	assert_eq!(client.session_id(), 0x77);
	assert_eq!(client.server().as_deref(), Some("a:1"));
	client.close().await;
}

#[tokio::test]
async fn timed_out_request_releases_its_slot() {
	let (dialer, mut controller) = FakeTransportBuilder::new().build();
	let (client, mut events) = Client::builder().servers(["a:1"]).dialer(dialer).connect().await.unwrap();
	let mut peer = accept(&mut controller).await;
	handshake(&mut peer, 1, 30_000).await;
	wait_for(&mut events, SessionEvent::Connected).await;

	let slow = {
		let client = client.clone();
		tokio::spawn(async move { client.submit_with_timeout(ops::GetData::new("/slow").unwrap(), Duration::from_millis(100)).await })
	};
	let (stale, _) = next_request(&mut peer).await;
	let result = timeout(WAIT, slow).await.unwrap().unwrap();
	assert_eq!(result, Err(Error::Timeout(Duration::from_millis(100))));

	// The late reply matches nothing and must not disturb the next request.
	reply(&mut peer, stale.xid, ErrorCode::Ok, data_reply(b"late")).await;

	let fast = {
		let client = client.clone();
		tokio::spawn(async move { client.get("/fast").await })
	};
	let (header, _) = next_request(&mut peer).await;
	assert_ne!(header.xid, stale.xid);
	reply(&mut peer, header.xid, ErrorCode::Ok, data_reply(b"fresh")).await;

	let (data, _) = timeout(WAIT, fast).await.unwrap().unwrap().unwrap();
	assert_eq!(data, b"fresh");
	client.close().await;
}

#[tokio::test]
async fn server_error_codes_surface_verbatim() {
	let (dialer, mut controller) = FakeTransportBuilder::new().build();
	let (client, mut events) = Client::builder().servers(["a:1"]).dialer(dialer).connect().await.unwrap();
	let mut peer = accept(&mut controller).await;
	handshake(&mut peer, 1, 30_000).await;
	wait_for(&mut events, SessionEvent::Connected).await;

	let delete = {
		let client = client.clone();
		tokio::spawn(async move { client.delete("/busy", ANY_VERSION).await })
	};
	let (header, _) = next_request(&mut peer).await;
	assert_eq!(header.opcode, OpCode::Delete.code());
	reply(&mut peer, header.xid, ErrorCode::NotEmpty, NoBody).await;
	assert_eq!(timeout(WAIT, delete).await.unwrap().unwrap(), Err(Error::Operation(ErrorCode::NotEmpty)));

	let exists = {
		let client = client.clone();
		tokio::spawn(async move { client.exists("/missing").await })
	};
	let (header, _) = next_request(&mut peer).await;
	reply(&mut peer, header.xid, ErrorCode::NoNode, NoBody).await;
	assert_eq!(timeout(WAIT, exists).await.unwrap().unwrap(), Ok(None));
	client.close().await;
}

#[tokio::test]
async fn oversized_request_is_refused_without_touching_the_connection() {
	let (dialer, mut controller) = FakeTransportBuilder::new().build();
	let (client, mut events) = Client::builder().servers(["a:1"]).max_frame_len(256).dialer(dialer).connect().await.unwrap();
	let mut peer = accept(&mut controller).await;
	handshake(&mut peer, 1, 30_000).await;
	wait_for(&mut events, SessionEvent::Connected).await;

	let err = client.set("/big", vec![0u8; 512], ANY_VERSION).await.unwrap_err();
	assert!(matches!(err, Error::InvalidArgument(_)), "{err:?}");

	let exists = {
		let client = client.clone();
		tokio::spawn(async move { client.exists("/big").await })
	};
	let (header, _) = next_request(&mut peer).await;
	assert_eq!(header.opcode, OpCode::Exists.code());
	reply(&mut peer, header.xid, ErrorCode::NoNode, NoBody).await;
	assert_eq!(timeout(WAIT, exists).await.unwrap().unwrap(), Ok(None));
	assert_eq!(client.state(), SessionState::Connected);
	client.close().await;
}

#[tokio::test]
async fn mid_flight_failure_replays_reads_and_fails_writes() {
	let (dialer, mut controller) = FakeTransportBuilder::new().build();
	let (client, mut events) = Client::builder().servers(["a:1", "b:1"]).shuffle_servers(false).dialer(dialer).connect().await.unwrap();
	let mut first = accept(&mut controller).await;
	handshake(&mut first, 9, 30_000).await;
	assert_eq!(wait_for(&mut events, SessionEvent::Connected).await.as_deref(), Some("a:1"));

	let read = {
		let client = client.clone();
		tokio::spawn(async move { client.get("/config").await })
	};
	let (read_header, _) = next_request(&mut first).await;
	let write = {
		let client = client.clone();
		tokio::spawn(async move { client.set("/config", b"v2".to_vec(), ANY_VERSION).await })
	};
	let (write_header, _) = next_request(&mut first).await;
	assert_eq!(read_header.opcode, OpCode::GetData.code());
	assert_eq!(write_header.opcode, OpCode::SetData.code());

	assert!(client.debug_kill_connection());
	assert_eq!(wait_for(&mut events, SessionEvent::Disconnected).await.as_deref(), Some("a:1"));
	assert_eq!(timeout(WAIT, write).await.unwrap().unwrap(), Err(Error::ConnectionLoss));

	let mut second = accept(&mut controller).await;
	assert_eq!(second.address, "b:1");
	let resume = handshake(&mut second, 9, 30_000).await;
	assert_eq!(resume.session_id, 9);
	assert_eq!(resume.password, vec![7; 16]);
	assert_eq!(wait_for(&mut events, SessionEvent::Connected).await.as_deref(), Some("b:1"));

	let (replayed, _) = next_request(&mut second).await;
	assert_eq!(replayed.opcode, OpCode::GetData.code());
	assert_eq!(replayed.xid, read_header.xid);
	reply(&mut second, replayed.xid, ErrorCode::Ok, data_reply(b"v1")).await;

	let (data, _) = timeout(WAIT, read).await.unwrap().unwrap().unwrap();
	assert_eq!(data, b"v1");
	client.close().await;
}

#[tokio::test]
async fn replay_all_resends_writes() {
	let (dialer, mut controller) = FakeTransportBuilder::new().build();
	let (client, mut events) = Client::builder()
		.servers(["a:1", "b:1"])
		.shuffle_servers(false)
		.replay_policy(ReplayPolicy::All)
		.dialer(dialer)
		.connect()
		.await
		.unwrap();
	let mut first = accept(&mut controller).await;
	handshake(&mut first, 3, 30_000).await;
	wait_for(&mut events, SessionEvent::Connected).await;

	let write = {
		let client = client.clone();
		tokio::spawn(async move { client.set("/k", b"v".to_vec(), ANY_VERSION).await })
	};
	next_request(&mut first).await;
	drop(first);

	let mut second = accept(&mut controller).await;
	handshake(&mut second, 3, 30_000).await;
	let (header, _) = next_request(&mut second).await;
	assert_eq!(header.opcode, OpCode::SetData.code());
	reply(&mut second, header.xid, ErrorCode::Ok, StatResponse { stat: Stat::default() }).await;

	assert!(timeout(WAIT, write).await.unwrap().unwrap().is_ok());
	client.close().await;
}

#[tokio::test]
async fn expired_session_fails_watches_and_starts_over() {
	let (dialer, mut controller) = FakeTransportBuilder::new().build();
	let (client, mut events) = Client::builder()
		.servers(["a:1", "b:1"])
		.shuffle_servers(false)
		.backoff(Duration::from_millis(10), Duration::from_millis(50))
		.dialer(dialer)
		.connect()
		.await
		.unwrap();
	let mut first = accept(&mut controller).await;
	handshake(&mut first, 5, 30_000).await;
	wait_for(&mut events, SessionEvent::Connected).await;

	let watch = {
		let client = client.clone();
		tokio::spawn(async move { client.exists_w("/lock").await })
	};
	let (header, _) = next_request(&mut first).await;
	reply(&mut first, header.xid, ErrorCode::NoNode, NoBody).await;
	let (stat, receiver) = timeout(WAIT, watch).await.unwrap().unwrap().unwrap();
	assert!(stat.is_none());

	drop(first);
	let mut second = accept(&mut controller).await;
	let resume = handshake(&mut second, 0, 0).await;
	assert_eq!(resume.session_id, 5);
	wait_for(&mut events, SessionEvent::SessionExpired).await;
	assert_eq!(timeout(WAIT, receiver.recv()).await.unwrap(), Err(Error::SessionExpired));

	let mut third = accept(&mut controller).await;
	let fresh = handshake(&mut third, 6, 30_000).await;
	assert_eq!(fresh.session_id, 0);
	assert_eq!(fresh.last_zxid_seen, 0);
	wait_for(&mut events, SessionEvent::Connected).await;
	assert_eq!(client.session_id(), 6);
	client.close().await;
}

#[tokio::test]
async fn watches_are_re_registered_after_a_reconnect() {
	let (dialer, mut controller) = FakeTransportBuilder::new().build();
	let (client, mut events) = Client::builder().servers(["a:1", "b:1"]).shuffle_servers(false).dialer(dialer).connect().await.unwrap();
	let mut first = accept(&mut controller).await;
	handshake(&mut first, 4, 30_000).await;
	wait_for(&mut events, SessionEvent::Connected).await;

	let watch = {
		let client = client.clone();
		tokio::spawn(async move { client.get_w("/cfg").await })
	};
	let (header, _) = next_request(&mut first).await;
	reply(&mut first, header.xid, ErrorCode::Ok, data_reply(b"x")).await;
	let (_, _, receiver) = timeout(WAIT, watch).await.unwrap().unwrap().unwrap();

	drop(first);
	let mut second = accept(&mut controller).await;
	handshake(&mut second, 4, 30_000).await;

	let mut frame = timeout(WAIT, second.conn.read()).await.unwrap().unwrap();
	let header = RequestHeader::decode(&mut frame).unwrap();
	assert_eq!(header.opcode, OpCode::SetWatches.code());
	let set_watches = zk_protocol::SetWatches::decode(&mut frame).unwrap();
	assert_eq!(set_watches.relative_zxid, 10);
	assert_eq!(set_watches.data_watches, ["/cfg"]);

	let mut buf = BytesMut::new();
	ReplyHeader {
		xid: WATCHER_EVENT_XID,
		zxid: -1,
		err: 0,
	}
	.encode(&mut buf);
	WatcherEvent {
		event_type: EventType::NodeDataChanged,
		state: KeeperState::SyncConnected,
		path: "/cfg".into(),
	}
	.encode(&mut buf);
	second.conn.write(&buf).await.unwrap();

	let fired = timeout(WAIT, receiver.recv()).await.unwrap().unwrap();
	assert_eq!(fired.path, "/cfg");
	client.close().await;
}

#[tokio::test]
async fn silent_server_triggers_a_reconnect() {
	let (dialer, mut controller) = FakeTransportBuilder::new().build();
	let (client, mut events) = Client::builder().servers(["a:1", "b:1"]).shuffle_servers(false).dialer(dialer).connect().await.unwrap();
	let mut first = accept(&mut controller).await;
	handshake(&mut first, 8, 300).await;
	wait_for(&mut events, SessionEvent::Connected).await;

	// Pings arrive every 100ms; never answering them drops the connection.
	let mut frame = timeout(WAIT, first.conn.read()).await.unwrap().unwrap();
	let header = RequestHeader::decode(&mut frame).unwrap();
	assert_eq!((header.xid, header.opcode), (PING_XID, OpCode::Ping.code()));

	assert_eq!(wait_for(&mut events, SessionEvent::Disconnected).await.as_deref(), Some("a:1"));
	let second = accept(&mut controller).await;
	assert_eq!(second.address, "b:1");
	client.close().await;
}

#[tokio::test]
async fn duplicate_credentials_are_sent_once() {
	let (dialer, mut controller) = FakeTransportBuilder::new().build();
	let (client, mut events) = Client::builder().servers(["a:1"]).dialer(dialer).connect().await.unwrap();
	let mut peer = accept(&mut controller).await;
	handshake(&mut peer, 2, 30_000).await;
	wait_for(&mut events, SessionEvent::Connected).await;

	let add = {
		let client = client.clone();
		tokio::spawn(async move { client.add_auth("digest", b"user:secret".to_vec()).await })
	};
	let (header, mut body) = next_request(&mut peer).await;
	assert_eq!((header.xid, header.opcode), (AUTH_XID, OpCode::Auth.code()));
	let packet = AuthPacket::decode(&mut body).unwrap();
	assert_eq!(packet.scheme, "digest");
	assert_eq!(packet.auth, b"user:secret");
	reply(&mut peer, AUTH_XID, ErrorCode::Ok, NoBody).await;
	timeout(WAIT, add).await.unwrap().unwrap().unwrap();

	timeout(WAIT, client.add_auth("digest", b"user:secret".to_vec())).await.unwrap().unwrap();
	let nothing = timeout(Duration::from_millis(200), peer.conn.read()).await;
	assert!(nothing.is_err(), "duplicate credential must not reach the wire");
	client.close().await;
}

#[tokio::test]
async fn rejected_credential_is_not_kept() {
	let (dialer, mut controller) = FakeTransportBuilder::new().build();
	let (client, mut events) = Client::builder().servers(["a:1"]).dialer(dialer).connect().await.unwrap();
	let mut peer = accept(&mut controller).await;
	handshake(&mut peer, 2, 30_000).await;
	wait_for(&mut events, SessionEvent::Connected).await;

	let add = {
		let client = client.clone();
		tokio::spawn(async move { client.add_auth("digest", b"bad".to_vec()).await })
	};
	next_request(&mut peer).await;
	reply(&mut peer, AUTH_XID, ErrorCode::AuthFailed, NoBody).await;
	assert_eq!(timeout(WAIT, add).await.unwrap().unwrap(), Err(Error::AuthFailed));
	assert_eq!(wait_for(&mut events, SessionEvent::AuthFailed).await.as_deref(), Some("a:1"));

	// Still usable, and a retry goes back on the wire.
	assert_eq!(client.state(), SessionState::Connected);
	let retry = {
		let client = client.clone();
		tokio::spawn(async move { client.add_auth("digest", b"bad".to_vec()).await })
	};
	let (header, _) = next_request(&mut peer).await;
	assert_eq!(header.xid, AUTH_XID);
	reply(&mut peer, AUTH_XID, ErrorCode::Ok, NoBody).await;
	timeout(WAIT, retry).await.unwrap().unwrap().unwrap();
	client.close().await;
}

#[tokio::test]
async fn unanswered_credential_is_kept_for_the_next_connection() {
	let (dialer, mut controller) = FakeTransportBuilder::new().build();
	let (client, mut events) = Client::builder()
		.servers(["a:1"])
		.request_timeout(Duration::from_millis(200))
		.dialer(dialer)
		.connect()
		.await
		.unwrap();
	let mut peer = accept(&mut controller).await;
	handshake(&mut peer, 3, 30_000).await;
	wait_for(&mut events, SessionEvent::Connected).await;

	let add = {
		let client = client.clone();
		tokio::spawn(async move { client.add_auth("digest", b"user:secret".to_vec()).await })
	};
	let (header, _) = next_request(&mut peer).await;
	assert_eq!(header.xid, AUTH_XID);
	// No reply: the wait gives up but the credential stays registered.
	assert_eq!(timeout(WAIT, add).await.unwrap().unwrap(), Ok(()));
	assert_eq!(client.add_auth("digest", b"user:secret".to_vec()).await, Ok(()));
	client.close().await;
}

struct CountingReauth {
	runs: Arc<AtomicUsize>,
}

impl Reauthenticator for CountingReauth {
	fn reauthenticate<'a>(&'a self, ctx: &'a ReauthContext) -> ReauthFuture<'a> {
		self.runs.fetch_add(1, Ordering::SeqCst);
		DefaultReauthenticator.reauthenticate(ctx)
	}
}

#[tokio::test]
async fn credentials_are_replayed_once_per_connection() {
	let runs = Arc::new(AtomicUsize::new(0));
	let (dialer, mut controller) = FakeTransportBuilder::new().build();
	let (client, mut events) = Client::builder()
		.servers(["a:1", "b:1"])
		.shuffle_servers(false)
		.reauthenticator(CountingReauth { runs: Arc::clone(&runs) })
		.dialer(dialer)
		.connect()
		.await
		.unwrap();

	// Registered before the first connection, so the first replay sends it.
	client.add_auth("digest", b"u:p".to_vec()).await.unwrap();

	let mut first = accept(&mut controller).await;
	handshake(&mut first, 11, 30_000).await;
	let (header, _) = next_request(&mut first).await;
	assert_eq!(header.xid, AUTH_XID);
	reply(&mut first, AUTH_XID, ErrorCode::Ok, NoBody).await;
	wait_for(&mut events, SessionEvent::Connected).await;

	client.debug_kill_connection();
	wait_for(&mut events, SessionEvent::Disconnected).await;
	let mut second = accept(&mut controller).await;
	handshake(&mut second, 11, 30_000).await;
	let (header, mut body) = next_request(&mut second).await;
	assert_eq!(header.xid, AUTH_XID);
	assert_eq!(AuthPacket::decode(&mut body).unwrap().auth, b"u:p");
	reply(&mut second, AUTH_XID, ErrorCode::Ok, NoBody).await;
	wait_for(&mut events, SessionEvent::Connected).await;

	// The session still serves requests after the replay.
	let get = {
		let client = client.clone();
		tokio::spawn(async move { client.get("/x").await })
	};
	let (header, _) = next_request(&mut second).await;
	reply(&mut second, header.xid, ErrorCode::Ok, data_reply(b"ok")).await;
	timeout(WAIT, get).await.unwrap().unwrap().unwrap();

	assert_eq!(runs.load(Ordering::SeqCst), 2);
	client.close().await;
}

#[tokio::test]
async fn auth_failed_notification_ends_the_session() {
	let (dialer, mut controller) = FakeTransportBuilder::new().build();
	let (client, mut events) = Client::builder().servers(["a:1"]).dialer(dialer).connect().await.unwrap();
	let mut peer = accept(&mut controller).await;
	handshake(&mut peer, 12, 30_000).await;
	wait_for(&mut events, SessionEvent::Connected).await;

	let pending = {
		let client = client.clone();
		tokio::spawn(async move { client.get("/x").await })
	};
	next_request(&mut peer).await;

	let mut buf = BytesMut::new();
	ReplyHeader {
		xid: WATCHER_EVENT_XID,
		zxid: -1,
		err: 0,
	}
	.encode(&mut buf);
	WatcherEvent {
		event_type: EventType::None,
		state: KeeperState::AuthFailed,
		path: String::new(),
	}
	.encode(&mut buf);
	peer.conn.write(&buf).await.unwrap();

	wait_for(&mut events, SessionEvent::AuthFailed).await;
	assert_eq!(timeout(WAIT, pending).await.unwrap().unwrap(), Err(Error::AuthFailed));
	assert_eq!(client.state(), SessionState::AuthFailed);
	assert_eq!(client.get("/y").await, Err(Error::AuthFailed));

	client.close().await;
	assert_eq!(client.state(), SessionState::Closed);
}
