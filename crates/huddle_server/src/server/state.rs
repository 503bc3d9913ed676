#![forbid(unsafe_code)]

use std::sync::Arc;

use huddle_domain::{ConnectionId, GroupId, Topic};
use huddle_protocol::{ServerEnvelope, encode_server_frame};
use tracing::{debug, error};

use crate::server::dispatcher::DropReason;
use crate::server::groups::GroupDirectory;
use crate::server::outbound::Frame;
use crate::server::registry::Registry;
use crate::server::topics::TopicBus;

/// Counts exposed to the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
	pub connections: usize,
	pub groups: usize,
}

/// All routing state of the relay. Exclusively owned by the hub task.
#[derive(Debug, Default)]
pub struct RelayState {
	pub registry: Registry,
	pub groups: GroupDirectory,
	pub topics: TopicBus,
}

impl RelayState {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn stats(&self) -> RelayStats {
		RelayStats {
			connections: self.registry.len(),
			groups: self.groups.len(),
		}
	}

	/// Membership gate applied before every group-scoped relay.
	pub fn check_member(&self, conn_id: &ConnectionId, group_id: &GroupId) -> Result<(), DropReason> {
		if self.groups.is_member(conn_id, group_id) {
			Ok(())
		} else if self.groups.contains(group_id) {
			Err(DropReason::NotMember)
		} else {
			Err(DropReason::UnknownGroup)
		}
	}

	/// Publish to a topic; returns the number of queues the frame reached.
	pub fn publish(&self, topic: &Topic, env: &ServerEnvelope, except: Option<&ConnectionId>) -> usize {
		match encode(env) {
			Some(frame) => self.publish_frame(topic, &frame, except),
			None => 0,
		}
	}

	pub fn publish_frame(&self, topic: &Topic, frame: &Frame, except: Option<&ConnectionId>) -> usize {
		let fanout = self.topics.publish(topic, frame, except);
		if fanout.dropped > 0 {
			debug!(%topic, delivered = fanout.delivered, dropped = fanout.dropped, "fan-out incomplete");
		}
		metrics::counter!("huddle_server_frames_out_total").increment(fanout.delivered as u64);
		fanout.delivered
	}

	/// Unicast through the connection's private topic.
	pub fn send_to(&self, conn_id: &ConnectionId, env: &ServerEnvelope) -> usize {
		self.publish(&Topic::Private(conn_id.clone()), env, None)
	}

	pub fn send_frame_to(&self, conn_id: &ConnectionId, frame: &Frame) -> usize {
		self.publish_frame(&Topic::Private(conn_id.clone()), frame, None)
	}
}

/// Serialize once so every recipient shares the same buffer.
pub fn encode(env: &ServerEnvelope) -> Option<Frame> {
	match encode_server_frame(env) {
		Ok(text) => Some(Arc::from(text)),
		Err(e) => {
			error!(error = %e, "failed to encode outbound frame");
			None
		}
	}
}
