#![forbid(unsafe_code)]

pub mod codec;
pub mod envelope;

pub use codec::{
	DEFAULT_MAX_FRAME_SIZE, DecodeError, EncodeError, decode_client_frame, decode_client_frame_with_limit, encode_server_frame,
};
pub use envelope::{ClientEnvelope, GroupSummary, PeerInfo, ReplyTo, ServerEnvelope};
