#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use huddle_domain::{ConnectionId, GroupId, Topic};
use huddle_protocol::GroupSummary;

use crate::server::registry::{Connection, Registry};
use crate::server::topics::TopicBus;

#[derive(Debug, Default)]
struct Group {
	members: HashSet<ConnectionId>,
	/// Creation order, used to keep roster snapshots stable.
	seq: u64,
}

/// Group membership and its reverse index.
///
/// `conn ∈ groups[g].members` holds exactly when `g ∈ memberships[conn]`; every
/// mutation below updates both sides and the socket's topic subscription together.
/// Groups are never removed, even once empty.
#[derive(Debug, Default)]
pub struct GroupDirectory {
	groups: HashMap<GroupId, Group>,
	memberships: HashMap<ConnectionId, HashSet<GroupId>>,
	next_seq: u64,
}

impl GroupDirectory {
	pub fn new() -> Self {
		Self::default()
	}

	/// Create a group owned (and joined) by `owner`.
	pub fn create(&mut self, owner: &Connection, bus: &mut TopicBus) -> GroupId {
		let mut group_id = GroupId::new_v4();
		while self.groups.contains_key(&group_id) {
			group_id = GroupId::new_v4();
		}

		let seq = self.next_seq;
		self.next_seq += 1;
		self.groups.insert(
			group_id.clone(),
			Group {
				members: HashSet::new(),
				seq,
			},
		);

		self.add_member(owner, &group_id, bus);
		group_id
	}

	/// Add a connection to an existing group. Returns `false` for unknown groups.
	pub fn join(&mut self, conn: &Connection, group_id: &GroupId, bus: &mut TopicBus) -> bool {
		if !self.groups.contains_key(group_id) {
			return false;
		}

		self.add_member(conn, group_id, bus);
		true
	}

	/// Remove a connection from a group. Returns `false` for unknown groups.
	pub fn leave(&mut self, conn_id: &ConnectionId, group_id: &GroupId, bus: &mut TopicBus) -> bool {
		let Some(group) = self.groups.get_mut(group_id) else {
			return false;
		};

		group.members.remove(conn_id);

		if let Some(set) = self.memberships.get_mut(conn_id) {
			set.remove(group_id);
			if set.is_empty() {
				self.memberships.remove(conn_id);
			}
		}

		bus.unsubscribe(&Topic::Group(group_id.clone()), conn_id);
		true
	}

	/// Leave every group the connection belongs to and erase its index entry.
	pub fn remove_connection(&mut self, conn_id: &ConnectionId, bus: &mut TopicBus) -> Vec<GroupId> {
		let joined: Vec<GroupId> = self
			.memberships
			.get(conn_id)
			.map(|set| set.iter().cloned().collect())
			.unwrap_or_default();

		for group_id in &joined {
			self.leave(conn_id, group_id, bus);
		}

		self.memberships.remove(conn_id);
		joined
	}

	pub fn is_member(&self, conn_id: &ConnectionId, group_id: &GroupId) -> bool {
		self.groups
			.get(group_id)
			.map(|g| g.members.contains(conn_id))
			.unwrap_or(false)
	}

	pub fn contains(&self, group_id: &GroupId) -> bool {
		self.groups.contains_key(group_id)
	}

	#[cfg(test)]
	pub fn members(&self, group_id: &GroupId) -> Option<&HashSet<ConnectionId>> {
		self.groups.get(group_id).map(|g| &g.members)
	}

	/// Groups the connection currently belongs to.
	#[cfg(test)]
	pub fn groups_of(&self, conn_id: &ConnectionId) -> HashSet<GroupId> {
		self.memberships.get(conn_id).cloned().unwrap_or_default()
	}

	/// Roster of every group with member display names resolved against `registry`.
	///
	/// Members that are no longer live are left out.
	pub fn snapshot(&self, registry: &Registry) -> Vec<GroupSummary> {
		let mut groups: Vec<(&GroupId, &Group)> = self.groups.iter().collect();
		groups.sort_by_key(|(_, g)| g.seq);

		groups
			.into_iter()
			.map(|(id, group)| {
				let mut members: Vec<_> = group
					.members
					.iter()
					.filter_map(|m| registry.lookup(m).map(|c| c.name.clone()))
					.collect();
				members.sort_by(|a, b| a.as_str().cmp(b.as_str()));

				GroupSummary {
					id: id.clone(),
					members,
				}
			})
			.collect()
	}

	pub fn len(&self) -> usize {
		self.groups.len()
	}

	#[cfg(test)]
	pub fn is_empty(&self) -> bool {
		self.groups.is_empty()
	}

	fn add_member(&mut self, conn: &Connection, group_id: &GroupId, bus: &mut TopicBus) {
		if let Some(group) = self.groups.get_mut(group_id) {
			group.members.insert(conn.id.clone());
		}
		self.memberships
			.entry(conn.id.clone())
			.or_default()
			.insert(group_id.clone());
		bus.subscribe(Topic::Group(group_id.clone()), &conn.id, conn.outbound());
	}
}
