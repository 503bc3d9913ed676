#![forbid(unsafe_code)]

use huddle_domain::{ConnectionId, DisplayName, GroupId, MessageKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Quoted message carried by the reply kinds.
///
/// Only `sender` is required; every other key (`body`, `imageData`, `messageType`
/// and anything a client adds) is kept as received and forwarded untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTo {
	pub sender: String,
	#[serde(flatten)]
	pub fields: Map<String, Value>,
}

impl ReplyTo {
	pub fn get(&self, key: &str) -> Option<&Value> {
		self.fields.get(key)
	}
}

/// `{id, name}` pair used by presence events and the user roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
	pub id: ConnectionId,
	pub name: DisplayName,
}

/// One group in a `GROUP_LIST` roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
	pub id: GroupId,
	pub members: Vec<DisplayName>,
}

/// Frames accepted from clients.
///
/// Identity fields (`sender`, `senderId`) are never read from the client; the
/// relay fills them from its own state when building the [`ServerEnvelope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ClientEnvelope {
	ClientMessage {
		body: Option<Value>,
	},
	GroupMessage {
		group_id: GroupId,
		body: Option<Value>,
	},
	CreateGroup,
	JoinGroup {
		group_id: GroupId,
	},
	LeaveGroup {
		group_id: GroupId,
	},
	GroupList,
	UserList,
	ImageMessage {
		image_data: Option<Value>,
		image_type: Option<Value>,
	},
	GroupImageMessage {
		group_id: GroupId,
		image_data: Option<Value>,
		image_type: Option<Value>,
	},
	TypingStarted,
	TypingStopped,
	GroupTypingStarted {
		group_id: GroupId,
	},
	GroupTypingStopped {
		group_id: GroupId,
	},
	ReplyMessage {
		body: Option<Value>,
		reply_to: ReplyTo,
	},
	GroupReplyMessage {
		group_id: GroupId,
		body: Option<Value>,
		reply_to: ReplyTo,
	},
	PrivateMessage {
		recipient_id: ConnectionId,
		body: Option<Value>,
	},
	PrivateImageMessage {
		recipient_id: ConnectionId,
		image_data: Option<Value>,
		image_type: Option<Value>,
	},
	PrivateTypingStarted {
		recipient_id: ConnectionId,
	},
	PrivateTypingStopped {
		recipient_id: ConnectionId,
	},
	PrivateReplyMessage {
		recipient_id: ConnectionId,
		body: Option<Value>,
		reply_to: ReplyTo,
	},
}

impl ClientEnvelope {
	pub fn kind(&self) -> MessageKind {
		match self {
			ClientEnvelope::ClientMessage { .. } => MessageKind::ClientMessage,
			ClientEnvelope::GroupMessage { .. } => MessageKind::GroupMessage,
			ClientEnvelope::CreateGroup => MessageKind::CreateGroup,
			ClientEnvelope::JoinGroup { .. } => MessageKind::JoinGroup,
			ClientEnvelope::LeaveGroup { .. } => MessageKind::LeaveGroup,
			ClientEnvelope::GroupList => MessageKind::GroupList,
			ClientEnvelope::UserList => MessageKind::UserList,
			ClientEnvelope::ImageMessage { .. } => MessageKind::ImageMessage,
			ClientEnvelope::GroupImageMessage { .. } => MessageKind::GroupImageMessage,
			ClientEnvelope::TypingStarted => MessageKind::TypingStarted,
			ClientEnvelope::TypingStopped => MessageKind::TypingStopped,
			ClientEnvelope::GroupTypingStarted { .. } => MessageKind::GroupTypingStarted,
			ClientEnvelope::GroupTypingStopped { .. } => MessageKind::GroupTypingStopped,
			ClientEnvelope::ReplyMessage { .. } => MessageKind::ReplyMessage,
			ClientEnvelope::GroupReplyMessage { .. } => MessageKind::GroupReplyMessage,
			ClientEnvelope::PrivateMessage { .. } => MessageKind::PrivateMessage,
			ClientEnvelope::PrivateImageMessage { .. } => MessageKind::PrivateImageMessage,
			ClientEnvelope::PrivateTypingStarted { .. } => MessageKind::PrivateTypingStarted,
			ClientEnvelope::PrivateTypingStopped { .. } => MessageKind::PrivateTypingStopped,
			ClientEnvelope::PrivateReplyMessage { .. } => MessageKind::PrivateReplyMessage,
		}
	}

	/// Group addressed by a group-scoped frame.
	pub fn group_id(&self) -> Option<&GroupId> {
		match self {
			ClientEnvelope::GroupMessage { group_id, .. }
			| ClientEnvelope::JoinGroup { group_id }
			| ClientEnvelope::LeaveGroup { group_id }
			| ClientEnvelope::GroupImageMessage { group_id, .. }
			| ClientEnvelope::GroupTypingStarted { group_id }
			| ClientEnvelope::GroupTypingStopped { group_id }
			| ClientEnvelope::GroupReplyMessage { group_id, .. } => Some(group_id),
			_ => None,
		}
	}

	/// Connection addressed by a private frame.
	pub fn recipient_id(&self) -> Option<&ConnectionId> {
		match self {
			ClientEnvelope::PrivateMessage { recipient_id, .. }
			| ClientEnvelope::PrivateImageMessage { recipient_id, .. }
			| ClientEnvelope::PrivateTypingStarted { recipient_id }
			| ClientEnvelope::PrivateTypingStopped { recipient_id }
			| ClientEnvelope::PrivateReplyMessage { recipient_id, .. } => Some(recipient_id),
			_ => None,
		}
	}
}

/// Frames emitted by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ServerEnvelope {
	SelfConnected {
		body: PeerInfo,
	},
	ClientConnected {
		body: PeerInfo,
	},
	ClientDisconnected {
		body: PeerInfo,
	},
	UserList {
		users: Vec<PeerInfo>,
	},
	GroupList {
		groups: Vec<GroupSummary>,
	},
	ClientMessage {
		sender: DisplayName,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		body: Option<Value>,
	},
	GroupMessage {
		sender: DisplayName,
		group_id: GroupId,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		body: Option<Value>,
	},
	ImageMessage {
		sender: DisplayName,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		image_data: Option<Value>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		image_type: Option<Value>,
	},
	GroupImageMessage {
		sender: DisplayName,
		group_id: GroupId,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		image_data: Option<Value>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		image_type: Option<Value>,
	},
	TypingStarted {
		sender: DisplayName,
	},
	TypingStopped {
		sender: DisplayName,
	},
	GroupTypingStarted {
		sender: DisplayName,
		group_id: GroupId,
	},
	GroupTypingStopped {
		sender: DisplayName,
		group_id: GroupId,
	},
	ReplyMessage {
		sender: DisplayName,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		body: Option<Value>,
		reply_to: ReplyTo,
	},
	GroupReplyMessage {
		sender: DisplayName,
		group_id: GroupId,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		body: Option<Value>,
		reply_to: ReplyTo,
	},
	PrivateMessage {
		sender: DisplayName,
		sender_id: ConnectionId,
		recipient_id: ConnectionId,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		body: Option<Value>,
	},
	PrivateImageMessage {
		sender: DisplayName,
		sender_id: ConnectionId,
		recipient_id: ConnectionId,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		image_data: Option<Value>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		image_type: Option<Value>,
	},
	PrivateTypingStarted {
		sender: DisplayName,
		sender_id: ConnectionId,
		recipient_id: ConnectionId,
	},
	PrivateTypingStopped {
		sender: DisplayName,
		sender_id: ConnectionId,
		recipient_id: ConnectionId,
	},
	PrivateReplyMessage {
		sender: DisplayName,
		sender_id: ConnectionId,
		recipient_id: ConnectionId,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		body: Option<Value>,
		reply_to: ReplyTo,
	},
}

impl ServerEnvelope {
	pub fn kind(&self) -> MessageKind {
		match self {
			ServerEnvelope::SelfConnected { .. } => MessageKind::SelfConnected,
			ServerEnvelope::ClientConnected { .. } => MessageKind::ClientConnected,
			ServerEnvelope::ClientDisconnected { .. } => MessageKind::ClientDisconnected,
			ServerEnvelope::UserList { .. } => MessageKind::UserList,
			ServerEnvelope::GroupList { .. } => MessageKind::GroupList,
			ServerEnvelope::ClientMessage { .. } => MessageKind::ClientMessage,
			ServerEnvelope::GroupMessage { .. } => MessageKind::GroupMessage,
			ServerEnvelope::ImageMessage { .. } => MessageKind::ImageMessage,
			ServerEnvelope::GroupImageMessage { .. } => MessageKind::GroupImageMessage,
			ServerEnvelope::TypingStarted { .. } => MessageKind::TypingStarted,
			ServerEnvelope::TypingStopped { .. } => MessageKind::TypingStopped,
			ServerEnvelope::GroupTypingStarted { .. } => MessageKind::GroupTypingStarted,
			ServerEnvelope::GroupTypingStopped { .. } => MessageKind::GroupTypingStopped,
			ServerEnvelope::ReplyMessage { .. } => MessageKind::ReplyMessage,
			ServerEnvelope::GroupReplyMessage { .. } => MessageKind::GroupReplyMessage,
			ServerEnvelope::PrivateMessage { .. } => MessageKind::PrivateMessage,
			ServerEnvelope::PrivateImageMessage { .. } => MessageKind::PrivateImageMessage,
			ServerEnvelope::PrivateTypingStarted { .. } => MessageKind::PrivateTypingStarted,
			ServerEnvelope::PrivateTypingStopped { .. } => MessageKind::PrivateTypingStopped,
			ServerEnvelope::PrivateReplyMessage { .. } => MessageKind::PrivateReplyMessage,
		}
	}
}
