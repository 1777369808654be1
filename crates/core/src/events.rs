//! Ordered delivery of session and node events.
//!
//! The receive loop must never block on a slow consumer, so the stream is a
//! bounded buffer that discards its oldest entry when full. Discards are
//! counted and logged.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{trace, warn};
use zk_protocol::EventType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
	Connecting,
	Connected,
	Disconnected,
	AuthFailed,
	SessionExpired,
	Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeEvent {
	Created,
	Deleted,
	DataChanged,
	ChildrenChanged,
}

impl NodeEvent {
	/// `None` for session-level notifications, which carry no node change.
	pub(crate) fn from_event_type(event_type: EventType) -> Option<Self> {
		match event_type {
			EventType::None => None,
			EventType::NodeCreated => Some(Self::Created),
			EventType::NodeDeleted => Some(Self::Deleted),
			EventType::NodeDataChanged => Some(Self::DataChanged),
			EventType::NodeChildrenChanged => Some(Self::ChildrenChanged),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
	Session {
		state: SessionEvent,
		/// Server involved in the transition, when there is one.
		server: Option<String>,
	},
	Node {
		kind: NodeEvent,
		path: String,
	},
}

impl Event {
	pub fn session(&self) -> Option<SessionEvent> {
		match self {
			Self::Session { state, .. } => Some(*state),
			Self::Node { .. } => None,
		}
	}
}

struct Inner {
	queue: Mutex<Queue>,
	notify: Notify,
	capacity: usize,
}

struct Queue {
	events: VecDeque<Event>,
	dropped: u64,
	closed: bool,
}

/// Publishing half, held by the session.
#[derive(Clone)]
pub(crate) struct EventDispatcher {
	inner: Arc<Inner>,
}

impl EventDispatcher {
	pub(crate) fn new(capacity: usize) -> (Self, EventStream) {
		let inner = Arc::new(Inner {
			queue: Mutex::new(Queue {
				events: VecDeque::with_capacity(capacity.min(1024)),
				dropped: 0,
				closed: false,
			}),
			notify: Notify::new(),
			capacity: capacity.max(1),
		});
		(Self { inner: Arc::clone(&inner) }, EventStream { inner })
	}

	/// Appends an event without blocking. Returns `false` once the stream has been closed.
	pub(crate) fn publish(&self, event: Event) -> bool {
		{
			let mut queue = self.inner.queue.lock();
			if queue.closed {
				return false;
			}
			if queue.events.len() >= self.inner.capacity {
				queue.events.pop_front();
				queue.dropped += 1;
				warn!(target = "zk.events", dropped = queue.dropped, capacity = self.inner.capacity, "event buffer full, dropped oldest event");
			}
			trace!(target = "zk.events", ?event, "event published");
			queue.events.push_back(event);
		}
		self.inner.notify.notify_one();
		true
	}

	pub(crate) fn session(&self, state: SessionEvent, server: Option<String>) -> bool {
		self.publish(Event::Session { state, server })
	}

	/// Ends the stream. Events already buffered are still delivered.
	pub(crate) fn close(&self) {
		self.inner.queue.lock().closed = true;
		self.inner.notify.notify_one();
	}
}

/// Receiving half handed to the caller by [`Client::connect`](crate::Client::connect).
pub struct EventStream {
	inner: Arc<Inner>,
}

impl EventStream {
	/// Next event, or `None` after the session closed and the buffer drained.
	pub async fn recv(&mut self) -> Option<Event> {
		loop {
			let notified = self.inner.notify.notified();
			{
				let mut queue = self.inner.queue.lock();
				if let Some(event) = queue.events.pop_front() {
					return Some(event);
				}
				if queue.closed {
					return None;
				}
			}
			notified.await;
		}
	}

	pub fn try_recv(&mut self) -> Option<Event> {
		self.inner.queue.lock().events.pop_front()
	}

	/// Events discarded because the buffer was full.
	pub fn dropped(&self) -> u64 {
		self.inner.queue.lock().dropped
	}

	pub fn is_closed(&self) -> bool {
		self.inner.queue.lock().closed
	}
}

impl std::fmt::Debug for EventStream {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let queue = self.inner.queue.lock();
		f.debug_struct("EventStream")
			.field("buffered", &queue.events.len())
			.field("dropped", &queue.dropped)
			.field("closed", &queue.closed)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	fn node(path: &str) -> Event {
		Event::Node {
			kind: NodeEvent::DataChanged,
			path: path.to_string(),
		}
	}

	#[tokio::test]
	async fn delivers_in_publish_order() {
		let (dispatcher, mut stream) = EventDispatcher::new(8);
		dispatcher.session(SessionEvent::Connected, Some("a:1".into()));
		dispatcher.publish(node("/x"));

		assert_eq!(stream.recv().await.unwrap().session(), Some(SessionEvent::Connected));
		assert_eq!(stream.recv().await.unwrap(), node("/x"));
		assert!(stream.try_recv().is_none());
	}

	#[tokio::test]
	async fn overflow_drops_the_oldest_event() {
		let (dispatcher, mut stream) = EventDispatcher::new(2);
		for path in ["/1", "/2", "/3"] {
			assert!(dispatcher.publish(node(path)));
		}

		assert_eq!(stream.dropped(), 1);
		assert_eq!(stream.recv().await.unwrap(), node("/2"));
		assert_eq!(stream.recv().await.unwrap(), node("/3"));
	}

	#[tokio::test]
	async fn close_ends_the_stream_after_draining() {
		let (dispatcher, mut stream) = EventDispatcher::new(4);
		dispatcher.session(SessionEvent::Closed, None);
		dispatcher.close();
		assert!(!dispatcher.publish(node("/late")));

		assert_eq!(stream.recv().await.unwrap().session(), Some(SessionEvent::Closed));
		assert!(stream.recv().await.is_none());
		assert!(stream.is_closed());
	}

	#[tokio::test]
	async fn recv_wakes_on_publish() {
		let (dispatcher, mut stream) = EventDispatcher::new(4);
		let waiter = tokio::spawn(async move { stream.recv().await });
		tokio::time::sleep(Duration::from_millis(10)).await;
		dispatcher.publish(node("/woke"));

		let event = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
		assert_eq!(event, Some(node("/woke")));
	}

	#[test]
	fn session_notifications_carry_no_node_event() {
		assert_eq!(NodeEvent::from_event_type(EventType::None), None);
		assert_eq!(NodeEvent::from_event_type(EventType::NodeDeleted), Some(NodeEvent::Deleted));
	}

	#[test]
	fn events_serialize_with_a_type_tag() {
		let json = serde_json::to_value(Event::Session {
			state: SessionEvent::Connected,
			server: Some("a:1".into()),
		})
		.unwrap();
		assert_eq!(json["type"], "session");
		assert_eq!(json["state"], "connected");
	}
}
