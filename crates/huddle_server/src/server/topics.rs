#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use huddle_domain::{ConnectionId, Topic};
use tracing::{debug, warn};

use crate::server::outbound::{DeliveryError, Frame, Outbound};

/// Result of publishing one frame to a topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fanout {
	pub delivered: usize,
	pub dropped: usize,
}

/// Topic → subscriber sockets, plus the reverse index used on disconnect.
///
/// Owned by the relay state; never shared across tasks.
#[derive(Debug, Default)]
pub struct TopicBus {
	subscribers: HashMap<Topic, HashMap<ConnectionId, Outbound>>,
	topics_by_conn: HashMap<ConnectionId, HashSet<Topic>>,
}

impl TopicBus {
	pub fn new() -> Self {
		Self::default()
	}

	/// Subscribe a socket to a topic. Returns `false` if it already was.
	pub fn subscribe(&mut self, topic: Topic, conn_id: &ConnectionId, outbound: &Outbound) -> bool {
		let inserted = self
			.topics_by_conn
			.entry(conn_id.clone())
			.or_default()
			.insert(topic.clone());

		if inserted {
			self.subscribers
				.entry(topic)
				.or_default()
				.insert(conn_id.clone(), outbound.clone());
		}

		inserted
	}

	/// Unsubscribe a socket from a topic. Returns `false` if it was not subscribed.
	pub fn unsubscribe(&mut self, topic: &Topic, conn_id: &ConnectionId) -> bool {
		let removed = match self.topics_by_conn.get_mut(conn_id) {
			Some(set) => set.remove(topic),
			None => false,
		};

		if removed {
			self.drop_subscriber(topic, conn_id);
		}

		removed
	}

	/// Remove every subscription of a socket. Returns the number removed.
	pub fn unsubscribe_all(&mut self, conn_id: &ConnectionId) -> usize {
		let Some(topics) = self.topics_by_conn.remove(conn_id) else {
			return 0;
		};

		for topic in &topics {
			self.drop_subscriber(topic, conn_id);
		}

		topics.len()
	}

	/// Deliver `frame` to every subscriber of `topic`, optionally skipping the publisher.
	///
	/// A failed delivery is logged and counted; it never stops the fan-out.
	pub fn publish(&self, topic: &Topic, frame: &Frame, except: Option<&ConnectionId>) -> Fanout {
		let mut fanout = Fanout::default();

		let Some(subs) = self.subscribers.get(topic) else {
			return fanout;
		};

		for (conn_id, outbound) in subs {
			if except == Some(conn_id) {
				continue;
			}

			match outbound.deliver(frame) {
				Ok(()) => fanout.delivered += 1,
				Err(DeliveryError::Full) => {
					fanout.dropped += 1;
					metrics::counter!("huddle_server_deliveries_dropped_total").increment(1);
					warn!(%topic, %conn_id, "outbound queue full; frame dropped");
				}
				Err(DeliveryError::Closed) => {
					fanout.dropped += 1;
					debug!(%topic, %conn_id, "outbound queue closed; frame dropped");
				}
			}
		}

		fanout
	}

	#[cfg(test)]
	pub fn subscriber_count(&self, topic: &Topic) -> usize {
		self.subscribers.get(topic).map(HashMap::len).unwrap_or(0)
	}

	#[cfg(test)]
	pub fn is_subscribed(&self, topic: &Topic, conn_id: &ConnectionId) -> bool {
		self.topics_by_conn
			.get(conn_id)
			.map(|set| set.contains(topic))
			.unwrap_or(false)
	}

	/// Snapshot of the topics a socket is subscribed to.
	#[cfg(test)]
	pub fn topics_for_conn(&self, conn_id: &ConnectionId) -> HashSet<Topic> {
		self.topics_by_conn.get(conn_id).cloned().unwrap_or_default()
	}

	fn drop_subscriber(&mut self, topic: &Topic, conn_id: &ConnectionId) {
		if let Some(subs) = self.subscribers.get_mut(topic) {
			subs.remove(conn_id);
			if subs.is_empty() {
				self.subscribers.remove(topic);
			}
		}
	}
}
