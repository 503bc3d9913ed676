#![forbid(unsafe_code)]

use huddle_domain::{ConnectionId, GroupId, Topic};
use huddle_protocol::{ClientEnvelope, DEFAULT_MAX_FRAME_SIZE, PeerInfo, ServerEnvelope, decode_client_frame_with_limit};
use tracing::{debug, info, warn};

use crate::server::identity::IdentityAllocator;
use crate::server::outbound::Outbound;
use crate::server::presence::{self, TypingTarget};
use crate::server::registry::Connection;
use crate::server::state::{self, RelayState};

/// Why an inbound frame produced no delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
	Decode(&'static str),
	UnknownSender,
	NotMember,
	UnknownGroup,
	RecipientGone,
}

impl DropReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			DropReason::Decode(reason) => reason,
			DropReason::UnknownSender => "unknown_sender",
			DropReason::NotMember => "not_member",
			DropReason::UnknownGroup => "unknown_group",
			DropReason::RecipientGone => "recipient_gone",
		}
	}
}

/// Result of handling one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	/// Number of outbound queues that accepted a frame (may be zero).
	Delivered(usize),
	Dropped(DropReason),
}

/// Connection lifecycle and per-kind routing over the relay state.
///
/// Synchronous by construction: every method runs to completion without awaiting,
/// so the owning task applies events strictly in arrival order.
#[derive(Debug)]
pub struct Dispatcher {
	state: RelayState,
	identity: IdentityAllocator,
	max_frame_bytes: usize,
}

impl Dispatcher {
	pub fn new(identity: IdentityAllocator, max_frame_bytes: usize) -> Self {
		Self {
			state: RelayState::new(),
			identity,
			max_frame_bytes,
		}
	}

	pub fn state(&self) -> &RelayState {
		&self.state
	}

	/// Admit a new socket: allocate an identity, register it and announce it.
	pub fn open(&mut self, socket: u64, outbound: Outbound) -> PeerInfo {
		let registry = &self.state.registry;
		let ident = self
			.identity
			.allocate(|id| registry.is_live(id), |name| registry.is_name_taken(name));

		let conn = Connection::new(ident.id, ident.name, socket, outbound);
		let peer = conn.peer();
		self.state.registry.register(conn, &mut self.state.topics);

		presence::greet(&self.state, &peer);
		presence::announce_connected(&self.state, &peer);
		presence::publish_user_roster(&self.state);

		metrics::counter!("huddle_server_connections_opened_total").increment(1);
		info!(conn_id = %peer.id, name = %peer.name, socket, "connection registered");
		peer
	}

	/// Tear down a connection and return it. Safe to call more than once.
	pub fn close(&mut self, conn_id: &ConnectionId) -> Option<Connection> {
		let state = &mut self.state;
		let conn = state.registry.unregister(conn_id, &mut state.groups, &mut state.topics)?;

		presence::announce_disconnected(&self.state, &conn.peer());

		metrics::counter!("huddle_server_connections_closed_total").increment(1);
		info!(conn_id = %conn.id, name = %conn.name, socket = conn.socket, "connection unregistered");
		Some(conn)
	}

	/// Decode one text frame and route it.
	pub fn handle_text(&mut self, sender: &ConnectionId, text: &str) -> Outcome {
		metrics::counter!("huddle_server_frames_in_total").increment(1);

		let outcome = match decode_client_frame_with_limit(text, self.max_frame_bytes) {
			Ok(env) => self.dispatch(sender, env),
			Err(e) => {
				warn!(conn_id = %sender, error = %e, "dropping undecodable frame");
				Outcome::Dropped(DropReason::Decode(e.reason()))
			}
		};

		if let Outcome::Dropped(reason) = outcome {
			metrics::counter!("huddle_server_frames_dropped_total", "reason" => reason.as_str()).increment(1);
		}
		outcome
	}

	/// Route an already-decoded envelope from `sender_id`.
	pub fn dispatch(&mut self, sender_id: &ConnectionId, env: ClientEnvelope) -> Outcome {
		let Some(sender) = self.state.registry.lookup(sender_id).map(Connection::peer) else {
			debug!(conn_id = %sender_id, kind = %env.kind(), "frame from unregistered connection");
			return Outcome::Dropped(DropReason::UnknownSender);
		};
		let name = sender.name.clone();

		match env {
			ClientEnvelope::ClientMessage { body } => self.broadcast(&sender, ServerEnvelope::ClientMessage { sender: name, body }),
			ClientEnvelope::ImageMessage { image_data, image_type } => self.broadcast(
				&sender,
				ServerEnvelope::ImageMessage {
					sender: name,
					image_data,
					image_type,
				},
			),
			ClientEnvelope::ReplyMessage { body, reply_to } => self.broadcast(
				&sender,
				ServerEnvelope::ReplyMessage {
					sender: name,
					body,
					reply_to,
				},
			),
			ClientEnvelope::TypingStarted => presence::relay_typing(&self.state, &sender, TypingTarget::Everyone, true),
			ClientEnvelope::TypingStopped => presence::relay_typing(&self.state, &sender, TypingTarget::Everyone, false),

			ClientEnvelope::GroupMessage { group_id, body } => self.relay_to_group(
				&sender,
				ServerEnvelope::GroupMessage {
					sender: name,
					group_id: group_id.clone(),
					body,
				},
				group_id,
			),
			ClientEnvelope::GroupImageMessage {
				group_id,
				image_data,
				image_type,
			} => self.relay_to_group(
				&sender,
				ServerEnvelope::GroupImageMessage {
					sender: name,
					group_id: group_id.clone(),
					image_data,
					image_type,
				},
				group_id,
			),
			ClientEnvelope::GroupReplyMessage { group_id, body, reply_to } => self.relay_to_group(
				&sender,
				ServerEnvelope::GroupReplyMessage {
					sender: name,
					group_id: group_id.clone(),
					body,
					reply_to,
				},
				group_id,
			),
			ClientEnvelope::GroupTypingStarted { group_id } => {
				presence::relay_typing(&self.state, &sender, TypingTarget::Group(group_id), true)
			}
			ClientEnvelope::GroupTypingStopped { group_id } => {
				presence::relay_typing(&self.state, &sender, TypingTarget::Group(group_id), false)
			}

			ClientEnvelope::PrivateMessage { recipient_id, body } => self.relay_private(
				&sender,
				ServerEnvelope::PrivateMessage {
					sender: name,
					sender_id: sender.id.clone(),
					recipient_id: recipient_id.clone(),
					body,
				},
				&recipient_id,
			),
			ClientEnvelope::PrivateImageMessage {
				recipient_id,
				image_data,
				image_type,
			} => self.relay_private(
				&sender,
				ServerEnvelope::PrivateImageMessage {
					sender: name,
					sender_id: sender.id.clone(),
					recipient_id: recipient_id.clone(),
					image_data,
					image_type,
				},
				&recipient_id,
			),
			ClientEnvelope::PrivateReplyMessage {
				recipient_id,
				body,
				reply_to,
			} => self.relay_private(
				&sender,
				ServerEnvelope::PrivateReplyMessage {
					sender: name,
					sender_id: sender.id.clone(),
					recipient_id: recipient_id.clone(),
					body,
					reply_to,
				},
				&recipient_id,
			),
			ClientEnvelope::PrivateTypingStarted { recipient_id } => {
				presence::relay_typing(&self.state, &sender, TypingTarget::Peer(recipient_id), true)
			}
			ClientEnvelope::PrivateTypingStopped { recipient_id } => {
				presence::relay_typing(&self.state, &sender, TypingTarget::Peer(recipient_id), false)
			}

			ClientEnvelope::UserList => Outcome::Delivered(self.state.send_to(
				&sender.id,
				&ServerEnvelope::UserList {
					users: self.state.registry.list(),
				},
			)),
			ClientEnvelope::GroupList => Outcome::Delivered(self.state.send_to(
				&sender.id,
				&ServerEnvelope::GroupList {
					groups: self.state.groups.snapshot(&self.state.registry),
				},
			)),

			ClientEnvelope::CreateGroup => self.create_group(&sender),
			ClientEnvelope::JoinGroup { group_id } => self.join_group(&sender, &group_id),
			ClientEnvelope::LeaveGroup { group_id } => self.leave_group(&sender, &group_id),
		}
	}

	/// Global broadcast to everyone but the publisher.
	fn broadcast(&self, sender: &PeerInfo, env: ServerEnvelope) -> Outcome {
		let topic = Topic::Global(env.kind());
		Outcome::Delivered(self.state.publish(&topic, &env, Some(&sender.id)))
	}

	/// Group broadcast; members only, the sender included.
	fn relay_to_group(&self, sender: &PeerInfo, env: ServerEnvelope, group_id: GroupId) -> Outcome {
		if let Err(reason) = self.state.check_member(&sender.id, &group_id) {
			debug!(conn_id = %sender.id, %group_id, kind = %env.kind(), ?reason, "group frame dropped");
			return Outcome::Dropped(reason);
		}

		Outcome::Delivered(self.state.publish(&Topic::Group(group_id), &env, None))
	}

	/// Deliver to the recipient and echo the same frame to the sender.
	fn relay_private(&self, sender: &PeerInfo, env: ServerEnvelope, recipient_id: &ConnectionId) -> Outcome {
		if !self.state.registry.is_live(recipient_id) {
			debug!(conn_id = %sender.id, %recipient_id, kind = %env.kind(), "private frame for absent peer dropped");
			return Outcome::Dropped(DropReason::RecipientGone);
		}

		let Some(frame) = state::encode(&env) else {
			return Outcome::Delivered(0);
		};

		// A self-addressed message is echoed too, so it arrives twice.
		let delivered = self.state.send_frame_to(recipient_id, &frame) + self.state.send_frame_to(&sender.id, &frame);
		Outcome::Delivered(delivered)
	}

	fn create_group(&mut self, sender: &PeerInfo) -> Outcome {
		let state = &mut self.state;
		let Some(conn) = state.registry.lookup(&sender.id) else {
			return Outcome::Dropped(DropReason::UnknownSender);
		};
		let group_id = state.groups.create(conn, &mut state.topics);

		metrics::counter!("huddle_server_groups_created_total").increment(1);
		info!(conn_id = %sender.id, %group_id, "group created");
		Outcome::Delivered(presence::publish_group_roster(&self.state))
	}

	fn join_group(&mut self, sender: &PeerInfo, group_id: &GroupId) -> Outcome {
		let state = &mut self.state;
		let Some(conn) = state.registry.lookup(&sender.id) else {
			return Outcome::Dropped(DropReason::UnknownSender);
		};
		if !state.groups.join(conn, group_id, &mut state.topics) {
			debug!(conn_id = %sender.id, %group_id, "join for unknown group ignored");
			return Outcome::Dropped(DropReason::UnknownGroup);
		}

		debug!(conn_id = %sender.id, %group_id, "joined group");
		Outcome::Delivered(presence::publish_group_roster(&self.state))
	}

	fn leave_group(&mut self, sender: &PeerInfo, group_id: &GroupId) -> Outcome {
		let state = &mut self.state;
		if !state.groups.leave(&sender.id, group_id, &mut state.topics) {
			debug!(conn_id = %sender.id, %group_id, "leave for unknown group ignored");
			return Outcome::Dropped(DropReason::UnknownGroup);
		}

		debug!(conn_id = %sender.id, %group_id, "left group");
		Outcome::Delivered(presence::publish_group_roster(&self.state))
	}
}

impl Default for Dispatcher {
	fn default() -> Self {
		Self::new(IdentityAllocator::default(), DEFAULT_MAX_FRAME_SIZE)
	}
}
