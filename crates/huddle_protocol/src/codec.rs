#![forbid(unsafe_code)]

use huddle_domain::{MessageKind, Scope};
use serde_json::Value;
use thiserror::Error;

use crate::envelope::{ClientEnvelope, ServerEnvelope};

/// Default maximum inbound frame size (inline images travel as encoded strings).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16 MiB

#[derive(Debug, Error)]
pub enum DecodeError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("unparseable frame: {0}")]
	Unparseable(#[source] serde_json::Error),

	#[error("frame has no string `type` field")]
	MissingType,

	#[error("unknown message type: {0}")]
	UnknownType(String),

	#[error("{0} is emitted by the server only")]
	ServerOnly(MessageKind),

	#[error("malformed {kind} frame: {source}")]
	Malformed {
		kind: MessageKind,
		#[source]
		source: serde_json::Error,
	},
}

impl DecodeError {
	/// Short label for logs and metrics.
	pub fn reason(&self) -> &'static str {
		match self {
			DecodeError::FrameTooLarge { .. } => "too_large",
			DecodeError::Unparseable(_) => "unparseable",
			DecodeError::MissingType => "missing_type",
			DecodeError::UnknownType(_) => "unknown_type",
			DecodeError::ServerOnly(_) => "server_only",
			DecodeError::Malformed { .. } => "malformed",
		}
	}
}

#[derive(Debug, Error)]
#[error("failed to encode {kind} frame: {source}")]
pub struct EncodeError {
	pub kind: MessageKind,
	#[source]
	pub source: serde_json::Error,
}

/// Decode one client frame using `DEFAULT_MAX_FRAME_SIZE`.
pub fn decode_client_frame(text: &str) -> Result<ClientEnvelope, DecodeError> {
	decode_client_frame_with_limit(text, DEFAULT_MAX_FRAME_SIZE)
}

/// Decode one client frame.
///
/// Classification happens in stages so that each failure maps onto a distinct
/// error: the frame must be JSON, carry a string `type`, name a known kind that
/// clients may send, and finally carry the fields that kind requires.
pub fn decode_client_frame_with_limit(text: &str, max_frame_size: usize) -> Result<ClientEnvelope, DecodeError> {
	if text.len() > max_frame_size {
		return Err(DecodeError::FrameTooLarge {
			len: text.len(),
			max: max_frame_size,
		});
	}

	let value: Value = serde_json::from_str(text).map_err(DecodeError::Unparseable)?;

	let kind = {
		let tag = value.get("type").and_then(Value::as_str).ok_or(DecodeError::MissingType)?;
		tag.parse::<MessageKind>()
			.map_err(|_| DecodeError::UnknownType(tag.to_string()))?
	};

	if kind.scope() == Scope::Server {
		return Err(DecodeError::ServerOnly(kind));
	}

	serde_json::from_value(value).map_err(|source| DecodeError::Malformed { kind, source })
}

/// Serialize a server frame to its text form.
pub fn encode_server_frame(env: &ServerEnvelope) -> Result<String, EncodeError> {
	serde_json::to_string(env).map_err(|source| EncodeError { kind: env.kind(), source })
}
