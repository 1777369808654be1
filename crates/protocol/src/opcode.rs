//! Operation codes and reserved transaction ids.

/// Reply xid of an unsolicited watcher notification.
pub const WATCHER_EVENT_XID: i32 = -1;
/// Xid used by keep-alive pings and their replies.
pub const PING_XID: i32 = -2;
/// Xid used by the server for authentication replies it sends on its own.
pub const AUTH_XID: i32 = -4;
/// Xid used for re-arming watches after a reconnect.
pub const SET_WATCHES_XID: i32 = -8;

/// Protocol version sent in the connect handshake.
pub const PROTOCOL_VERSION: i32 = 0;
/// Length of the session password issued by the server.
pub const PASSWORD_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum OpCode {
	Notification = 0,
	Create = 1,
	Delete = 2,
	Exists = 3,
	GetData = 4,
	SetData = 5,
	GetAcl = 6,
	SetAcl = 7,
	GetChildren = 8,
	Sync = 9,
	Ping = 11,
	GetChildren2 = 12,
	Check = 13,
	Multi = 14,
	Create2 = 15,
	GetEphemerals = 103,
	GetAllChildrenNumber = 104,
	Auth = 100,
	SetWatches = 101,
	CreateSession = -10,
	CloseSession = -11,
}

impl OpCode {
	pub fn from_code(code: i32) -> Option<Self> {
		Some(match code {
			0 => Self::Notification,
			1 => Self::Create,
			2 => Self::Delete,
			3 => Self::Exists,
			4 => Self::GetData,
			5 => Self::SetData,
			6 => Self::GetAcl,
			7 => Self::SetAcl,
			8 => Self::GetChildren,
			9 => Self::Sync,
			11 => Self::Ping,
			12 => Self::GetChildren2,
			13 => Self::Check,
			14 => Self::Multi,
			15 => Self::Create2,
			100 => Self::Auth,
			101 => Self::SetWatches,
			103 => Self::GetEphemerals,
			104 => Self::GetAllChildrenNumber,
			-10 => Self::CreateSession,
			-11 => Self::CloseSession,
			_ => return None,
		})
	}

	pub fn code(self) -> i32 {
		self as i32
	}

	/// Whether the operation only reads state, so resending it cannot change
	/// the tree.
	pub fn is_read_only(self) -> bool {
		matches!(
			self,
			Self::Exists
				| Self::GetData
				| Self::GetAcl
				| Self::GetChildren
				| Self::GetChildren2
				| Self::Sync
				| Self::Ping
				| Self::GetEphemerals
				| Self::GetAllChildrenNumber
				| Self::Auth
				| Self::SetWatches
		)
	}
}
