#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{Context as _, anyhow};
use futures::{SinkExt, StreamExt};
use huddle_protocol::DEFAULT_MAX_FRAME_SIZE;
use huddle_util::endpoint::DEFAULT_WS_PATH;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, info, warn};

use crate::server::hub::HubHandle;
use crate::server::outbound::Outbound;

/// How long the writer may keep flushing queued frames after the session ends.
const WRITER_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Per-socket transport settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
	/// Only upgrades on this path are accepted.
	pub ws_path: String,
	pub max_frame_bytes: usize,
	/// Session ends when nothing (pings included) arrives for this long.
	pub idle_timeout: Duration,
	pub outbound_queue_capacity: usize,
}

impl Default for SessionSettings {
	fn default() -> Self {
		Self {
			ws_path: DEFAULT_WS_PATH.to_string(),
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			idle_timeout: Duration::from_secs(60),
			outbound_queue_capacity: 1024,
		}
	}
}

/// Accept loop. Each socket gets its own session task.
pub async fn serve(listener: TcpListener, hub: HubHandle, settings: SessionSettings) {
	let mut next_socket: u64 = 1;

	loop {
		let (stream, remote) = match listener.accept().await {
			Ok(accepted) => accepted,
			Err(e) => {
				warn!(error = %e, "accept failed");
				tokio::time::sleep(Duration::from_millis(50)).await;
				continue;
			}
		};

		let socket = next_socket;
		next_socket += 1;
		metrics::counter!("huddle_server_connections_total").increment(1);

		let hub = hub.clone();
		let settings = settings.clone();
		tokio::spawn(async move {
			debug!(socket, %remote, "accepted tcp connection");
			if let Err(e) = handle_session(socket, stream, hub, settings).await {
				warn!(socket, %remote, error = %e, "session exited with error");
			}
		});
	}
}

/// Upgrade one TCP stream and pump frames between it and the hub until it closes.
pub async fn handle_session(socket: u64, stream: TcpStream, hub: HubHandle, settings: SessionSettings) -> anyhow::Result<()> {
	let ws_path = settings.ws_path.clone();
	let check_path = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
		if req.uri().path() == ws_path {
			return Ok(resp);
		}
		let mut err = ErrorResponse::new(Some("not found".to_string()));
		*err.status_mut() = StatusCode::NOT_FOUND;
		Err(err)
	};

	let ws_config = WebSocketConfig::default()
		.max_message_size(Some(settings.max_frame_bytes))
		.max_frame_size(Some(settings.max_frame_bytes));

	let ws = tokio_tungstenite::accept_hdr_async_with_config(stream, check_path, Some(ws_config))
		.await
		.context("websocket handshake")?;

	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("huddle_server_active_connections").decrement(1.0);
		}
	}

	metrics::gauge!("huddle_server_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let (mut sink, mut stream) = ws.split();
	let (outbound, mut out_rx) = Outbound::channel(settings.outbound_queue_capacity);

	let Some(peer) = hub.open(socket, outbound).await else {
		let _ = sink.close().await;
		return Err(anyhow!("relay hub is not running"));
	};
	let conn_id = peer.id;
	info!(socket, %conn_id, name = %peer.name, "session opened");

	// Ends once the hub drops the connection's queue and everything queued is flushed.
	let mut writer = tokio::spawn(async move {
		while let Some(frame) = out_rx.recv().await {
			sink.send(Message::text(frame.to_string()))
				.await
				.context("write frame")?;
		}
		let _ = sink.close().await;
		Ok::<(), anyhow::Error>(())
	});

	let read_result = loop {
		let next = match tokio::time::timeout(settings.idle_timeout, stream.next()).await {
			Ok(next) => next,
			Err(_) => {
				info!(%conn_id, idle_secs = settings.idle_timeout.as_secs(), "closing idle session");
				break Ok(());
			}
		};

		let msg = match next {
			None => break Ok(()),
			Some(Ok(msg)) => msg,
			Some(Err(e)) => break Err(anyhow!(e).context("read frame")),
		};

		let text = match msg {
			Message::Text(text) => text.as_str().to_owned(),
			Message::Binary(data) => match std::str::from_utf8(&data) {
				Ok(text) => text.to_owned(),
				Err(_) => {
					metrics::counter!("huddle_server_frames_dropped_total", "reason" => "binary_not_utf8").increment(1);
					warn!(%conn_id, len = data.len(), "dropping binary frame that is not UTF-8");
					continue;
				}
			},
			Message::Close(_) => break Ok(()),
			Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
		};

		if !hub.frame(&conn_id, text).await {
			break Err(anyhow!("relay hub stopped"));
		}
	};

	hub.close(&conn_id).await;

	match tokio::time::timeout(WRITER_DRAIN_GRACE, &mut writer).await {
		Ok(Ok(Err(e))) => debug!(%conn_id, error = %e, "writer stopped early"),
		Ok(_) => {}
		Err(_) => {
			writer.abort();
			debug!(%conn_id, "writer did not drain in time");
		}
	}

	info!(socket, %conn_id, "session closed");
	read_result
}
