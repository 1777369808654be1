//! Wire types for the ZooKeeper client protocol.
//!
//! This crate contains the records exchanged with an ensemble member once a
//! frame has been cut out of the byte stream. These types represent the
//! "protocol layer" - the shapes of data as they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond encoding/decoding
//! * 1:1 with protocol: Match the jute record layouts field for field
//! * Stable: Changes only when the wire protocol changes
//!
//! Session handling, request correlation and reconnection live in `zk-rs`.

pub mod codec;
pub mod error;
pub mod opcode;
pub mod records;

pub use codec::{Decode, Encode};
pub use error::{DecodeError, ErrorCode};
pub use opcode::*;
pub use records::*;
