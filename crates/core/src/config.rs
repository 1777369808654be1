//! Client configuration.
//!
//! [`ClientConfig`] deserializes from JSON (or any serde format); durations
//! are written as milliseconds, e.g. `"session_timeout_ms": 10000`. Missing
//! fields take their defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use zk_runtime::DEFAULT_MAX_FRAME_LEN;

use crate::error::{Error, Result};

/// What happens to requests that were sent but not answered when a
/// connection drops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPolicy {
	/// Resend reads; fail writes with [`Error::ConnectionLoss`] because they
	/// may already have been applied.
	#[default]
	ReadsOnly,
	/// Resend every request on the next connection.
	All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
	/// Ensemble members as `host` or `host:port`.
	pub servers: Vec<String>,
	#[serde(rename = "session_timeout_ms", with = "duration_ms")]
	pub session_timeout: Duration,
	/// Bound on dialing plus the handshake with one server.
	#[serde(rename = "connect_timeout_ms", with = "duration_ms")]
	pub connect_timeout: Duration,
	/// Default deadline for each request; `None` waits indefinitely.
	#[serde(rename = "request_timeout_ms", with = "opt_duration_ms")]
	pub request_timeout: Option<Duration>,
	/// Bound on the close-session exchange and on joining background tasks.
	#[serde(rename = "close_timeout_ms", with = "duration_ms")]
	pub close_timeout: Duration,
	#[serde(rename = "backoff_initial_ms", with = "duration_ms")]
	pub backoff_initial: Duration,
	#[serde(rename = "backoff_max_ms", with = "duration_ms")]
	pub backoff_max: Duration,
	/// Requests that may wait for the send loop before callers block.
	pub send_queue_capacity: usize,
	/// Events buffered for the event stream before the oldest is dropped.
	pub event_capacity: usize,
	pub max_frame_len: usize,
	pub shuffle_servers: bool,
	pub replay_policy: ReplayPolicy,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			servers: Vec::new(),
			session_timeout: Duration::from_secs(10),
			connect_timeout: Duration::from_secs(1),
			request_timeout: None,
			close_timeout: Duration::from_secs(2),
			backoff_initial: Duration::from_millis(100),
			backoff_max: Duration::from_secs(5),
			send_queue_capacity: 16,
			event_capacity: 256,
			max_frame_len: DEFAULT_MAX_FRAME_LEN,
			shuffle_servers: true,
			replay_policy: ReplayPolicy::ReadsOnly,
		}
	}
}

impl ClientConfig {
	pub fn validate(&self) -> Result<()> {
		if self.servers.is_empty() {
			return Err(Error::InvalidArgument("at least one server address is required".into()));
		}
		if self.session_timeout.is_zero() || self.session_timeout.as_millis() > i32::MAX as u128 {
			return Err(Error::InvalidArgument(format!("session timeout {:?} out of range", self.session_timeout)));
		}
		if self.connect_timeout.is_zero() {
			return Err(Error::InvalidArgument("connect timeout must be positive".into()));
		}
		if self.send_queue_capacity == 0 {
			return Err(Error::InvalidArgument("send queue capacity must be positive".into()));
		}
		if self.event_capacity == 0 {
			return Err(Error::InvalidArgument("event capacity must be positive".into()));
		}
		if self.backoff_initial.is_zero() {
			return Err(Error::InvalidArgument("initial backoff must be positive".into()));
		}
		if self.backoff_initial > self.backoff_max {
			return Err(Error::InvalidArgument("initial backoff exceeds maximum backoff".into()));
		}
		Ok(())
	}
}

mod duration_ms {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(value.as_millis() as u64)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}

mod opt_duration_ms {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
		match value {
			Some(value) => serializer.serialize_some(&(value.as_millis() as u64)),
			None => serializer.serialize_none(),
		}
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
		Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
	}
}
