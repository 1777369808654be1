//! Async ZooKeeper client core.
//!
//! A [`Client`] owns one logical session against an ensemble. Requests from
//! any number of tasks are pipelined over a single connection and matched back
//! to their callers by xid. When the connection fails the session task picks
//! the next ensemble member, resumes the session, replays credentials and
//! watches, and resends whatever is safe to resend.
//!
//! ```ignore
//! let (client, mut events) = Client::connect(["zk1:2181", "zk2:2181"], Duration::from_secs(10)).await?;
//! client.create("/app", b"v1", CreateFlags::PERSISTENT, Acl::world_all()).await?;
//! let (data, stat, watch) = client.get_w("/app").await?;
//! ```
//!
//! Session state changes and node notifications arrive in order on the
//! [`EventStream`]. Per-path one-shot listeners come back from the `*_w`
//! operations as [`WatchReceiver`]s.

pub mod client;
pub mod config;
mod ephemerals;
pub mod error;
pub mod events;
mod multiplexer;
pub mod ops;
mod pending;
pub mod reauth;
mod session;
pub mod watches;

pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, ReplayPolicy};
pub use error::{Error, Result};
pub use events::{Event, EventStream, NodeEvent, SessionEvent};
pub use ops::Operation;
pub use reauth::{Credential, DefaultReauthenticator, ReauthContext, ReauthFuture, Reauthenticator};
pub use session::SessionState;
pub use watches::{WatchKind, WatchReceiver, WatchedEvent};
pub use zk_protocol::{Acl, CreateFlags, ErrorCode, Id, OpCode, Stat, perms};
pub use zk_runtime::{Dialer, TcpDialer};
