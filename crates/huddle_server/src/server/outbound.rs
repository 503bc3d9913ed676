#![forbid(unsafe_code)]

use std::sync::Arc;

use tokio::sync::mpsc;

/// One serialized server frame, shared between all recipients of a fan-out.
pub type Frame = Arc<str>;

/// Why a single delivery did not make it into a peer's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
	/// The peer is not draining its queue fast enough.
	Full,
	/// The session task has already gone away.
	Closed,
}

/// Bounded outbound queue of one connection, drained by its session task.
#[derive(Debug, Clone)]
pub struct Outbound {
	tx: mpsc::Sender<Frame>,
}

impl Outbound {
	pub fn new(tx: mpsc::Sender<Frame>) -> Self {
		Self { tx }
	}

	/// Create a queue and its receiving half.
	pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
		let (tx, rx) = mpsc::channel(capacity.max(1));
		(Self::new(tx), rx)
	}

	/// Non-blocking enqueue. Never waits on a slow peer.
	pub fn deliver(&self, frame: &Frame) -> Result<(), DeliveryError> {
		match self.tx.try_send(Arc::clone(frame)) {
			Ok(()) => Ok(()),
			Err(mpsc::error::TrySendError::Full(_)) => Err(DeliveryError::Full),
			Err(mpsc::error::TrySendError::Closed(_)) => Err(DeliveryError::Closed),
		}
	}
}
