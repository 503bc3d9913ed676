#![forbid(unsafe_code)]

//! Transient presence events (connect, disconnect, rosters) and typing indicators.
//!
//! Nothing here keeps state: every call builds an envelope from the current
//! relay state and hands it to the topic bus.

use huddle_domain::{ConnectionId, GroupId, MessageKind, Topic};
use huddle_protocol::{PeerInfo, ServerEnvelope};
use tracing::debug;

use crate::server::dispatcher::{DropReason, Outcome};
use crate::server::state::RelayState;

/// Who a typing indicator is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingTarget {
	Everyone,
	Group(GroupId),
	Peer(ConnectionId),
}

/// `SELF_CONNECTED` to the new connection only.
pub fn greet(state: &RelayState, peer: &PeerInfo) -> usize {
	state.send_to(&peer.id, &ServerEnvelope::SelfConnected { body: peer.clone() })
}

pub fn announce_connected(state: &RelayState, peer: &PeerInfo) -> usize {
	state.publish(
		&Topic::Global(MessageKind::ClientConnected),
		&ServerEnvelope::ClientConnected { body: peer.clone() },
		None,
	)
}

pub fn announce_disconnected(state: &RelayState, peer: &PeerInfo) -> usize {
	state.publish(
		&Topic::Global(MessageKind::ClientDisconnected),
		&ServerEnvelope::ClientDisconnected { body: peer.clone() },
		None,
	)
}

/// Full user roster to every live connection.
pub fn publish_user_roster(state: &RelayState) -> usize {
	state.publish(
		&Topic::Global(MessageKind::UserList),
		&ServerEnvelope::UserList {
			users: state.registry.list(),
		},
		None,
	)
}

/// Full group roster to every live connection, whoever was involved in the change.
pub fn publish_group_roster(state: &RelayState) -> usize {
	state.publish(
		&Topic::Global(MessageKind::GroupList),
		&ServerEnvelope::GroupList {
			groups: state.groups.snapshot(&state.registry),
		},
		None,
	)
}

/// Relay a typing indicator with the addressing rules of the matching chat kind.
pub fn relay_typing(state: &RelayState, sender: &PeerInfo, target: TypingTarget, started: bool) -> Outcome {
	let name = sender.name.clone();

	match target {
		TypingTarget::Everyone => {
			let env = if started {
				ServerEnvelope::TypingStarted { sender: name }
			} else {
				ServerEnvelope::TypingStopped { sender: name }
			};
			Outcome::Delivered(state.publish(&Topic::Global(env.kind()), &env, Some(&sender.id)))
		}
		TypingTarget::Group(group_id) => {
			if let Err(reason) = state.check_member(&sender.id, &group_id) {
				debug!(conn_id = %sender.id, %group_id, ?reason, "typing indicator dropped");
				return Outcome::Dropped(reason);
			}

			let topic = Topic::Group(group_id.clone());
			let env = if started {
				ServerEnvelope::GroupTypingStarted { sender: name, group_id }
			} else {
				ServerEnvelope::GroupTypingStopped { sender: name, group_id }
			};
			Outcome::Delivered(state.publish(&topic, &env, None))
		}
		TypingTarget::Peer(recipient_id) => {
			if !state.registry.is_live(&recipient_id) {
				debug!(conn_id = %sender.id, %recipient_id, "typing indicator for absent peer dropped");
				return Outcome::Dropped(DropReason::RecipientGone);
			}

			let env = if started {
				ServerEnvelope::PrivateTypingStarted {
					sender: name,
					sender_id: sender.id.clone(),
					recipient_id: recipient_id.clone(),
				}
			} else {
				ServerEnvelope::PrivateTypingStopped {
					sender: name,
					sender_id: sender.id.clone(),
					recipient_id: recipient_id.clone(),
				}
			};
			Outcome::Delivered(state.send_to(&recipient_id, &env))
		}
	}
}
