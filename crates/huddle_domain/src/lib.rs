#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers and kinds from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("unknown message kind: {0}")]
	UnknownKind(String),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

macro_rules! opaque_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(String);

		impl $name {
			/// Create a non-empty id from an existing string.
			pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
				let id = id.into();
				if id.trim().is_empty() {
					return Err(ParseIdError::Empty);
				}
				Ok(Self(id))
			}

			/// Create a new random (v4) id.
			pub fn new_v4() -> Self {
				Self(uuid::Uuid::new_v4().to_string())
			}

			pub fn as_str(&self) -> &str {
				&self.0
			}

			pub fn into_string(self) -> String {
				self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}

		impl FromStr for $name {
			type Err = ParseIdError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				$name::new(s.to_string())
			}
		}
	};
}

opaque_id! {
	/// Server-assigned connection identifier; also the private delivery key.
	ConnectionId
}

opaque_id! {
	/// Server-assigned group identifier.
	GroupId
}

/// Ephemeral display name shown to other peers (e.g. `user-42`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayName(String);

impl DisplayName {
	/// Prefix used for generated names.
	pub const PREFIX: &'static str = "user-";

	pub fn new(name: impl Into<String>) -> Self {
		Self(name.into())
	}

	/// `user-<n>`
	pub fn numbered(n: u32) -> Self {
		Self(format!("{}{n}", Self::PREFIX))
	}

	/// `user-<n>-<suffix>`, used once the numbered space is crowded.
	pub fn numbered_with_suffix(n: u32, suffix: &str) -> Self {
		Self(format!("{}{n}-{suffix}", Self::PREFIX))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for DisplayName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Addressing scope of a message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
	/// Server-originated presence and roster events.
	Server,
	/// Broadcast to every live connection except the publisher.
	Global,
	/// Broadcast to the members of one group.
	Group,
	/// Unicast to one addressed connection.
	Private,
	/// Answered to the requester only.
	Query,
	/// Mutates group membership, then republishes the group roster.
	Membership,
}

macro_rules! message_kinds {
	($($variant:ident => $wire:literal, $scope:ident;)*) => {
		/// Closed enumeration of envelope `type` tags.
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
		pub enum MessageKind {
			$(
				#[serde(rename = $wire)]
				$variant,
			)*
		}

		impl MessageKind {
			/// Every kind, in wire-enumeration order.
			pub const ALL: &'static [MessageKind] = &[$(MessageKind::$variant),*];

			/// Stable wire identifier.
			pub const fn as_str(self) -> &'static str {
				match self {
					$(MessageKind::$variant => $wire,)*
				}
			}

			pub const fn scope(self) -> Scope {
				match self {
					$(MessageKind::$variant => Scope::$scope,)*
				}
			}
		}

		impl FromStr for MessageKind {
			type Err = ParseIdError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				if s.is_empty() {
					return Err(ParseIdError::Empty);
				}

				match s {
					$($wire => Ok(MessageKind::$variant),)*
					other => Err(ParseIdError::UnknownKind(other.to_string())),
				}
			}
		}
	};
}

message_kinds! {
	SelfConnected => "SELF_CONNECTED", Server;
	ClientConnected => "CLIENT_CONNECTED", Server;
	ClientDisconnected => "CLIENT_DISCONNECTED", Server;
	ClientMessage => "CLIENT_MESSAGE", Global;
	GroupMessage => "GROUP_MESSAGE", Group;
	CreateGroup => "CREATE_GROUP", Membership;
	JoinGroup => "JOIN_GROUP", Membership;
	LeaveGroup => "LEAVE_GROUP", Membership;
	GroupList => "GROUP_LIST", Query;
	UserList => "USER_LIST", Query;
	ImageMessage => "IMAGE_MESSAGE", Global;
	GroupImageMessage => "GROUP_IMAGE_MESSAGE", Group;
	TypingStarted => "TYPING_STARTED", Global;
	TypingStopped => "TYPING_STOPPED", Global;
	GroupTypingStarted => "GROUP_TYPING_STARTED", Group;
	GroupTypingStopped => "GROUP_TYPING_STOPPED", Group;
	ReplyMessage => "REPLY_MESSAGE", Global;
	GroupReplyMessage => "GROUP_REPLY_MESSAGE", Group;
	PrivateMessage => "PRIVATE_MESSAGE", Private;
	PrivateImageMessage => "PRIVATE_IMAGE_MESSAGE", Private;
	PrivateTypingStarted => "PRIVATE_TYPING_STARTED", Private;
	PrivateTypingStopped => "PRIVATE_TYPING_STOPPED", Private;
	PrivateReplyMessage => "PRIVATE_REPLY_MESSAGE", Private;
}

impl fmt::Display for MessageKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Named broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
	/// One global channel per kind (chat, image, typing, presence, rosters).
	Global(MessageKind),
	/// Members of one group.
	Group(GroupId),
	/// Private delivery channel keyed by the connection's own id.
	Private(ConnectionId),
}

impl Topic {
	/// Global topics every connection subscribes to on open.
	pub const GLOBAL_KINDS: &'static [MessageKind] = &[
		MessageKind::ClientConnected,
		MessageKind::ClientDisconnected,
		MessageKind::ClientMessage,
		MessageKind::ImageMessage,
		MessageKind::TypingStarted,
		MessageKind::TypingStopped,
		MessageKind::ReplyMessage,
		MessageKind::UserList,
		MessageKind::GroupList,
	];
}

impl fmt::Display for Topic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Topic::Global(kind) => write!(f, "global:{kind}"),
			Topic::Group(id) => write!(f, "group:{id}"),
			Topic::Private(id) => write!(f, "private:{id}"),
		}
	}
}
