#![forbid(unsafe_code)]

use huddle_domain::{ConnectionId, DisplayName};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Upper bound (exclusive) of the number in `user-<n>`.
pub const NAME_SPACE: u32 = 9999;

/// Default number of random candidates tried before falling back to a suffixed name.
pub const DEFAULT_NAME_RETRY_LIMIT: u32 = 64;

/// Fresh id/name pair for a new connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
	pub id: ConnectionId,
	pub name: DisplayName,
}

/// Generates ephemeral identities, checked against the live set.
#[derive(Debug)]
pub struct IdentityAllocator {
	rng: StdRng,
	retry_limit: u32,
}

impl IdentityAllocator {
	pub fn new(retry_limit: u32) -> Self {
		Self::with_rng(StdRng::from_os_rng(), retry_limit)
	}

	pub fn with_rng(rng: StdRng, retry_limit: u32) -> Self {
		Self {
			rng,
			retry_limit: retry_limit.max(1),
		}
	}

	/// Allocate an identity whose id and display name are not held by a live connection.
	pub fn allocate(
		&mut self,
		id_taken: impl Fn(&ConnectionId) -> bool,
		name_taken: impl Fn(&DisplayName) -> bool,
	) -> Identity {
		let mut id = ConnectionId::new_v4();
		while id_taken(&id) {
			id = ConnectionId::new_v4();
		}

		let name = self.allocate_name(&id, name_taken);
		Identity { id, name }
	}

	fn allocate_name(&mut self, id: &ConnectionId, name_taken: impl Fn(&DisplayName) -> bool) -> DisplayName {
		for _ in 0..self.retry_limit {
			let candidate = DisplayName::numbered(self.rng.random_range(0..NAME_SPACE));
			if !name_taken(&candidate) {
				return candidate;
			}
		}

		// The id is unique among live connections, so a suffix taken from it is too.
		let n = self.rng.random_range(0..NAME_SPACE);
		let suffix: String = id.as_str().chars().filter(|c| c.is_ascii_alphanumeric()).take(8).collect();
		let mut candidate = DisplayName::numbered_with_suffix(n, &suffix);
		if name_taken(&candidate) {
			candidate = DisplayName::numbered_with_suffix(n, id.as_str());
		}

		debug!(name = %candidate, retries = self.retry_limit, "name space crowded; using suffixed name");
		candidate
	}
}

impl Default for IdentityAllocator {
	fn default() -> Self {
		Self::new(DEFAULT_NAME_RETRY_LIMIT)
	}
}
