#![forbid(unsafe_code)]

use std::sync::Arc;

use huddle_domain::ConnectionId;
use huddle_protocol::{DEFAULT_MAX_FRAME_SIZE, PeerInfo};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::server::directory::DirectoryMirror;
use crate::server::dispatcher::{Dispatcher, Outcome};
use crate::server::health::HealthState;
use crate::server::identity::{DEFAULT_NAME_RETRY_LIMIT, IdentityAllocator};
use crate::server::outbound::Outbound;

/// Settings for the relay hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
	/// Maximum number of events queued from sessions before they wait.
	pub queue_capacity: usize,
	/// Directory mirror writes buffered before new ones are dropped.
	pub mirror_queue_capacity: usize,
	pub name_retry_limit: u32,
	pub max_frame_bytes: usize,
}

impl Default for HubConfig {
	fn default() -> Self {
		Self {
			queue_capacity: 4096,
			mirror_queue_capacity: 1024,
			name_retry_limit: DEFAULT_NAME_RETRY_LIMIT,
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
		}
	}
}

/// Session-originated events, applied one at a time by the hub.
#[derive(Debug)]
pub enum HubEvent {
	Open {
		socket: u64,
		outbound: Outbound,
		reply: oneshot::Sender<PeerInfo>,
	},
	Frame {
		conn_id: ConnectionId,
		text: String,
	},
	Close {
		conn_id: ConnectionId,
	},
}

/// Cloneable sender side of the hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
	tx: mpsc::Sender<HubEvent>,
}

impl HubHandle {
	/// Register a socket. Returns `None` once the hub has shut down.
	pub async fn open(&self, socket: u64, outbound: Outbound) -> Option<PeerInfo> {
		let (reply, rx) = oneshot::channel();
		self.tx
			.send(HubEvent::Open {
				socket,
				outbound,
				reply,
			})
			.await
			.ok()?;
		rx.await.ok()
	}

	/// Forward one inbound text frame. Returns `false` once the hub has shut down.
	pub async fn frame(&self, conn_id: &ConnectionId, text: String) -> bool {
		self.tx
			.send(HubEvent::Frame {
				conn_id: conn_id.clone(),
				text,
			})
			.await
			.is_ok()
	}

	pub async fn close(&self, conn_id: &ConnectionId) {
		let _ = self.tx.send(HubEvent::Close { conn_id: conn_id.clone() }).await;
	}
}

/// Writes queued for the directory mirror, applied in order off the hub task.
#[derive(Debug)]
pub enum MirrorOp {
	Add(PeerInfo, u64),
	Remove(ConnectionId, u64),
}

/// Bounded queue in front of the directory mirror's writer task.
#[derive(Debug, Clone)]
pub struct MirrorQueue {
	tx: mpsc::Sender<MirrorOp>,
}

impl MirrorQueue {
	/// Spawn the writer task for `mirror` and return its queue.
	pub fn spawn(mirror: Arc<dyn DirectoryMirror>, capacity: usize) -> Self {
		info!(mirror = mirror.name(), capacity, "directory mirror selected");
		let (tx, mut rx) = mpsc::channel::<MirrorOp>(capacity.max(1));

		tokio::spawn(async move {
			while let Some(op) = rx.recv().await {
				let result = match &op {
					MirrorOp::Add(peer, socket) => mirror.add_user(peer, *socket).await,
					MirrorOp::Remove(conn_id, socket) => mirror.remove_user(conn_id, *socket).await,
				};
				if let Err(e) = result {
					metrics::counter!("huddle_server_directory_errors_total").increment(1);
					warn!(mirror = mirror.name(), ?op, error = %e, "directory mirror write failed");
				}
			}
		});

		Self { tx }
	}

	/// Queue a write without waiting. Returns `false` if it was dropped.
	pub fn push(&self, op: MirrorOp) -> bool {
		match self.tx.try_send(op) {
			Ok(()) => true,
			Err(mpsc::error::TrySendError::Full(op)) => {
				metrics::counter!("huddle_server_directory_errors_total").increment(1);
				warn!(?op, "directory mirror queue full; write dropped");
				false
			}
			Err(mpsc::error::TrySendError::Closed(op)) => {
				metrics::counter!("huddle_server_directory_errors_total").increment(1);
				warn!(?op, "directory mirror writer gone; write dropped");
				false
			}
		}
	}
}

/// Single owner of all relay state.
pub struct RelayHub {
	dispatcher: Dispatcher,
	rx: mpsc::Receiver<HubEvent>,
	mirror: MirrorQueue,
	health: HealthState,
}

impl RelayHub {
	pub fn new(dispatcher: Dispatcher, rx: mpsc::Receiver<HubEvent>, mirror: MirrorQueue, health: HealthState) -> Self {
		Self {
			dispatcher,
			rx,
			mirror,
			health,
		}
	}

	/// Run until every [`HubHandle`] has been dropped.
	pub async fn run(mut self) {
		info!("relay hub started");

		while let Some(ev) = self.rx.recv().await {
			self.apply(ev);
			self.health.record(self.dispatcher.state().stats());
		}

		info!("relay hub exiting (all sessions gone)");
	}

	fn apply(&mut self, ev: HubEvent) {
		match ev {
			HubEvent::Open {
				socket,
				outbound,
				reply,
			} => {
				let peer = self.dispatcher.open(socket, outbound);
				self.mirror.push(MirrorOp::Add(peer.clone(), socket));
				if reply.send(peer.clone()).is_err() {
					// Session went away during the handshake.
					self.close(&peer.id);
				}
			}
			HubEvent::Frame { conn_id, text } => match self.dispatcher.handle_text(&conn_id, &text) {
				Outcome::Delivered(n) => debug!(%conn_id, delivered = n, "frame routed"),
				Outcome::Dropped(reason) => debug!(%conn_id, reason = reason.as_str(), "frame dropped"),
			},
			HubEvent::Close { conn_id } => self.close(&conn_id),
		}
	}

	fn close(&mut self, conn_id: &ConnectionId) {
		if let Some(conn) = self.dispatcher.close(conn_id) {
			self.mirror.push(MirrorOp::Remove(conn.id.clone(), conn.socket));
		}
	}
}

/// Spawn the hub task and return a handle for sessions.
pub fn spawn_hub(cfg: &HubConfig, mirror: Arc<dyn DirectoryMirror>, health: HealthState) -> HubHandle {
	let (tx, rx) = mpsc::channel(cfg.queue_capacity.max(1));
	let dispatcher = Dispatcher::new(IdentityAllocator::new(cfg.name_retry_limit), cfg.max_frame_bytes);

	let mirror = MirrorQueue::spawn(mirror, cfg.mirror_queue_capacity);

	tokio::spawn(RelayHub::new(dispatcher, rx, mirror, health).run());

	HubHandle { tx }
}
