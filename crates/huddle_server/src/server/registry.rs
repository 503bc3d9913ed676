#![forbid(unsafe_code)]

use std::collections::HashMap;

use huddle_domain::{ConnectionId, DisplayName, Topic};
use huddle_protocol::PeerInfo;

use crate::server::groups::GroupDirectory;
use crate::server::outbound::Outbound;
use crate::server::topics::TopicBus;

/// A live connection: identity plus the socket's outbound queue.
#[derive(Debug, Clone)]
pub struct Connection {
	pub id: ConnectionId,
	pub name: DisplayName,
	/// Transport-level socket sequence number (for logs and the directory mirror).
	pub socket: u64,
	outbound: Outbound,
}

impl Connection {
	pub fn new(id: ConnectionId, name: DisplayName, socket: u64, outbound: Outbound) -> Self {
		Self {
			id,
			name,
			socket,
			outbound,
		}
	}

	pub fn outbound(&self) -> &Outbound {
		&self.outbound
	}

	pub fn peer(&self) -> PeerInfo {
		PeerInfo {
			id: self.id.clone(),
			name: self.name.clone(),
		}
	}
}

/// Live set of connections.
#[derive(Debug, Default)]
pub struct Registry {
	live: HashMap<ConnectionId, Connection>,
	names: HashMap<DisplayName, ConnectionId>,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Add a connection and subscribe its socket to the global topics and its private topic.
	pub fn register(&mut self, conn: Connection, bus: &mut TopicBus) {
		for kind in Topic::GLOBAL_KINDS {
			bus.subscribe(Topic::Global(*kind), &conn.id, &conn.outbound);
		}
		bus.subscribe(Topic::Private(conn.id.clone()), &conn.id, &conn.outbound);

		self.names.insert(conn.name.clone(), conn.id.clone());
		self.live.insert(conn.id.clone(), conn);
	}

	/// Remove a connection, its group memberships and every topic subscription.
	///
	/// Returns `None` if the id is not live, so repeated calls are harmless.
	pub fn unregister(&mut self, id: &ConnectionId, groups: &mut GroupDirectory, bus: &mut TopicBus) -> Option<Connection> {
		let conn = self.live.remove(id)?;

		if self.names.get(&conn.name) == Some(id) {
			self.names.remove(&conn.name);
		}

		groups.remove_connection(id, bus);
		bus.unsubscribe_all(id);

		Some(conn)
	}

	/// Snapshot of `{id, name}` for every live connection.
	pub fn list(&self) -> Vec<PeerInfo> {
		self.live.values().map(Connection::peer).collect()
	}

	pub fn lookup(&self, id: &ConnectionId) -> Option<&Connection> {
		self.live.get(id)
	}

	pub fn is_live(&self, id: &ConnectionId) -> bool {
		self.live.contains_key(id)
	}

	pub fn is_name_taken(&self, name: &DisplayName) -> bool {
		self.names.contains_key(name)
	}

	pub fn len(&self) -> usize {
		self.live.len()
	}
}
