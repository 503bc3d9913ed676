#![forbid(unsafe_code)]

//! Advisory mirror of live identities for out-of-process lookup.
//!
//! Routing never reads from here. The hub queues writes to a single background
//! writer task, which applies them in order and only logs failures.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use huddle_domain::ConnectionId;
use huddle_protocol::PeerInfo;

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
	#[error("directory backend unavailable: {0}")]
	Unavailable(String),
	#[cfg(feature = "redis-mirror")]
	#[error("directory entry is corrupt: {0}")]
	Corrupt(String),
}

pub type MirrorResult<T> = Result<T, MirrorError>;

#[async_trait]
pub trait DirectoryMirror: Send + Sync {
	/// Record a live user and the socket it is connected on.
	async fn add_user(&self, user: &PeerInfo, socket: u64) -> MirrorResult<()>;

	/// Forget a user and its socket mapping.
	async fn remove_user(&self, user_id: &ConnectionId, socket: u64) -> MirrorResult<()>;

	async fn list_users(&self) -> MirrorResult<Vec<PeerInfo>>;

	async fn lookup_by_socket(&self, socket: u64) -> MirrorResult<Option<ConnectionId>>;

	fn name(&self) -> &'static str;
}

/// Mirror that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDirectory;

#[async_trait]
impl DirectoryMirror for NullDirectory {
	async fn add_user(&self, _user: &PeerInfo, _socket: u64) -> MirrorResult<()> {
		Ok(())
	}

	async fn remove_user(&self, _user_id: &ConnectionId, _socket: u64) -> MirrorResult<()> {
		Ok(())
	}

	async fn list_users(&self) -> MirrorResult<Vec<PeerInfo>> {
		Ok(Vec::new())
	}

	async fn lookup_by_socket(&self, _socket: u64) -> MirrorResult<Option<ConnectionId>> {
		Ok(None)
	}

	fn name(&self) -> &'static str {
		"null"
	}
}

#[derive(Debug, Default)]
struct InMemoryTables {
	users: HashMap<ConnectionId, PeerInfo>,
	user_socket: HashMap<ConnectionId, u64>,
	socket_user: HashMap<u64, ConnectionId>,
}

/// Process-local mirror.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
	tables: Mutex<InMemoryTables>,
}

impl InMemoryDirectory {
	pub fn new() -> Self {
		Self::default()
	}

	fn with_tables<T>(&self, f: impl FnOnce(&mut InMemoryTables) -> T) -> MirrorResult<T> {
		let mut tables = self
			.tables
			.lock()
			.map_err(|_| MirrorError::Unavailable("in-memory directory lock poisoned".to_string()))?;
		Ok(f(&mut tables))
	}
}

#[async_trait]
impl DirectoryMirror for InMemoryDirectory {
	async fn add_user(&self, user: &PeerInfo, socket: u64) -> MirrorResult<()> {
		self.with_tables(|t| {
			t.users.insert(user.id.clone(), user.clone());
			t.user_socket.insert(user.id.clone(), socket);
			t.socket_user.insert(socket, user.id.clone());
		})
	}

	async fn remove_user(&self, user_id: &ConnectionId, socket: u64) -> MirrorResult<()> {
		self.with_tables(|t| {
			t.users.remove(user_id);
			t.user_socket.remove(user_id);
			if t.socket_user.get(&socket) == Some(user_id) {
				t.socket_user.remove(&socket);
			}
		})
	}

	async fn list_users(&self) -> MirrorResult<Vec<PeerInfo>> {
		self.with_tables(|t| t.users.values().cloned().collect())
	}

	async fn lookup_by_socket(&self, socket: u64) -> MirrorResult<Option<ConnectionId>> {
		self.with_tables(|t| t.socket_user.get(&socket).cloned())
	}

	fn name(&self) -> &'static str {
		"in-memory"
	}
}

#[cfg(feature = "redis-mirror")]
pub use redis_backend::RedisDirectory;

#[cfg(feature = "redis-mirror")]
mod redis_backend {
	use async_trait::async_trait;
	use huddle_domain::ConnectionId;
	use huddle_protocol::PeerInfo;
	use redis::AsyncCommands;
	use redis::aio::ConnectionManager;
	use tracing::debug;

	use super::{DirectoryMirror, MirrorError, MirrorResult};

	impl From<redis::RedisError> for MirrorError {
		fn from(e: redis::RedisError) -> Self {
			MirrorError::Unavailable(e.to_string())
		}
	}

	/// Redis-backed mirror.
	///
	/// Layout under `prefix`: `connected_users` (hash of user id to `{id, name}` JSON),
	/// `user_socket:<id>` and `socket_user:<socket>`.
	#[derive(Clone)]
	pub struct RedisDirectory {
		conn: ConnectionManager,
		prefix: String,
	}

	impl RedisDirectory {
		pub async fn connect(url: &str, prefix: impl Into<String>) -> MirrorResult<Self> {
			let client = redis::Client::open(url)?;
			let conn = client.get_connection_manager().await?;
			debug!(%url, "redis directory connected");
			Ok(Self {
				conn,
				prefix: prefix.into(),
			})
		}

		fn users_key(&self) -> String {
			format!("{}connected_users", self.prefix)
		}

		fn user_socket_key(&self, user_id: &ConnectionId) -> String {
			format!("{}user_socket:{user_id}", self.prefix)
		}

		fn socket_user_key(&self, socket: u64) -> String {
			format!("{}socket_user:{socket}", self.prefix)
		}
	}

	#[async_trait]
	impl DirectoryMirror for RedisDirectory {
		async fn add_user(&self, user: &PeerInfo, socket: u64) -> MirrorResult<()> {
			let json = serde_json::to_string(user).map_err(|e| MirrorError::Corrupt(e.to_string()))?;
			let mut conn = self.conn.clone();

			let _: () = conn.hset(self.users_key(), user.id.as_str(), json).await?;
			let _: () = conn.set(self.user_socket_key(&user.id), socket).await?;
			let _: () = conn.set(self.socket_user_key(socket), user.id.as_str()).await?;
			Ok(())
		}

		async fn remove_user(&self, user_id: &ConnectionId, socket: u64) -> MirrorResult<()> {
			let mut conn = self.conn.clone();

			let _: () = conn.hdel(self.users_key(), user_id.as_str()).await?;
			let _: () = conn.del(self.user_socket_key(user_id)).await?;
			let _: () = conn.del(self.socket_user_key(socket)).await?;
			Ok(())
		}

		async fn list_users(&self) -> MirrorResult<Vec<PeerInfo>> {
			let mut conn = self.conn.clone();
			let raw: Vec<String> = conn.hvals(self.users_key()).await?;

			raw.iter()
				.map(|s| serde_json::from_str(s).map_err(|e| MirrorError::Corrupt(e.to_string())))
				.collect()
		}

		async fn lookup_by_socket(&self, socket: u64) -> MirrorResult<Option<ConnectionId>> {
			let mut conn = self.conn.clone();
			let raw: Option<String> = conn.get(self.socket_user_key(socket)).await?;

			raw.map(|s| ConnectionId::new(s).map_err(|e| MirrorError::Corrupt(e.to_string())))
				.transpose()
		}

		fn name(&self) -> &'static str {
			"redis"
		}
	}
}
