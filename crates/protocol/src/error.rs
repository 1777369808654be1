use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
	#[error("truncated {what}: needed {needed} bytes, {remaining} remaining")]
	Truncated { what: &'static str, needed: usize, remaining: usize },
	#[error("invalid utf-8 in {what}")]
	InvalidUtf8 { what: &'static str },
	#[error("unknown {what} value {value}")]
	UnknownValue { what: &'static str, value: i32 },
}

/// Server-side result codes carried in every reply header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
	Ok,
	SystemError,
	RuntimeInconsistency,
	DataInconsistency,
	ConnectionLoss,
	MarshallingError,
	Unimplemented,
	OperationTimeout,
	BadArguments,
	InvalidState,
	ApiError,
	NoNode,
	NoAuth,
	BadVersion,
	NoChildrenForEphemerals,
	NodeExists,
	NotEmpty,
	SessionExpired,
	InvalidCallback,
	InvalidAcl,
	AuthFailed,
	Closing,
	Nothing,
	SessionMoved,
	NotReadOnly,
	EphemeralOnLocalSession,
	NoWatcher,
	ReconfigDisabled,
	/// A code this client does not know about, kept verbatim.
	Unknown(i32),
}

impl ErrorCode {
	pub fn from_code(code: i32) -> Self {
		match code {
			0 => Self::Ok,
			-1 => Self::SystemError,
			-2 => Self::RuntimeInconsistency,
			-3 => Self::DataInconsistency,
			-4 => Self::ConnectionLoss,
			-5 => Self::MarshallingError,
			-6 => Self::Unimplemented,
			-7 => Self::OperationTimeout,
			-8 => Self::BadArguments,
			-9 => Self::InvalidState,
			-100 => Self::ApiError,
			-101 => Self::NoNode,
			-102 => Self::NoAuth,
			-103 => Self::BadVersion,
			-108 => Self::NoChildrenForEphemerals,
			-110 => Self::NodeExists,
			-111 => Self::NotEmpty,
			-112 => Self::SessionExpired,
			-113 => Self::InvalidCallback,
			-114 => Self::InvalidAcl,
			-115 => Self::AuthFailed,
			-116 => Self::Closing,
			-117 => Self::Nothing,
			-118 => Self::SessionMoved,
			-119 => Self::NotReadOnly,
			-120 => Self::EphemeralOnLocalSession,
			-121 => Self::NoWatcher,
			-123 => Self::ReconfigDisabled,
			other => Self::Unknown(other),
		}
	}

	pub fn code(self) -> i32 {
		match self {
			Self::Ok => 0,
			Self::SystemError => -1,
			Self::RuntimeInconsistency => -2,
			Self::DataInconsistency => -3,
			Self::ConnectionLoss => -4,
			Self::MarshallingError => -5,
			Self::Unimplemented => -6,
			Self::OperationTimeout => -7,
			Self::BadArguments => -8,
			Self::InvalidState => -9,
			Self::ApiError => -100,
			Self::NoNode => -101,
			Self::NoAuth => -102,
			Self::BadVersion => -103,
			Self::NoChildrenForEphemerals => -108,
			Self::NodeExists => -110,
			Self::NotEmpty => -111,
			Self::SessionExpired => -112,
			Self::InvalidCallback => -113,
			Self::InvalidAcl => -114,
			Self::AuthFailed => -115,
			Self::Closing => -116,
			Self::Nothing => -117,
			Self::SessionMoved => -118,
			Self::NotReadOnly => -119,
			Self::EphemeralOnLocalSession => -120,
			Self::NoWatcher => -121,
			Self::ReconfigDisabled => -123,
			Self::Unknown(code) => code,
		}
	}

	pub fn is_ok(self) -> bool {
		self == Self::Ok
	}
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let text = match self {
			Self::Ok => "ok",
			Self::SystemError => "system error",
			Self::RuntimeInconsistency => "runtime inconsistency",
			Self::DataInconsistency => "data inconsistency",
			Self::ConnectionLoss => "connection loss",
			Self::MarshallingError => "marshalling error",
			Self::Unimplemented => "unimplemented",
			Self::OperationTimeout => "operation timeout",
			Self::BadArguments => "bad arguments",
			Self::InvalidState => "invalid state",
			Self::ApiError => "api error",
			Self::NoNode => "node does not exist",
			Self::NoAuth => "not authenticated",
			Self::BadVersion => "version conflict",
			Self::NoChildrenForEphemerals => "ephemeral nodes may not have children",
			Self::NodeExists => "node already exists",
			Self::NotEmpty => "node has children",
			Self::SessionExpired => "session has been expired by the server",
			Self::InvalidCallback => "invalid callback",
			Self::InvalidAcl => "invalid ACL specified",
			Self::AuthFailed => "client authentication failed",
			Self::Closing => "zookeeper is closing",
			Self::Nothing => "no server responses to process",
			Self::SessionMoved => "session moved to another server",
			Self::NotReadOnly => "server is not read-only",
			Self::EphemeralOnLocalSession => "ephemeral node on local session",
			Self::NoWatcher => "no such watcher",
			Self::ReconfigDisabled => "reconfig is disabled",
			Self::Unknown(code) => return write!(f, "unknown error code {code}"),
		};
		f.write_str(text)
	}
}
