#![forbid(unsafe_code)]

mod config;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use huddle_util::endpoint::WsEndpoint;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::DirectorySettings;
use crate::server::directory::{DirectoryMirror, InMemoryDirectory, NullDirectory};
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::hub::spawn_hub;
use crate::server::session::serve;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: huddle_server [--bind ws://host:port/path] [--config path]\n\
\n\
Options:\n\
\t--bind     Listen endpoint (default: ws://127.0.0.1:7777/ws)\n\
\t          Format: ws://host:port[/path]\n\
\t--config   Config file (default: ~/.huddle/config.toml)\n\
\t--help     Show this help\n\
"
	);
	std::process::exit(2)
}

#[derive(Debug, Default)]
struct Args {
	bind: Option<WsEndpoint>,
	config: Option<PathBuf>,
}

fn parse_args() -> Args {
	let mut args = Args::default();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let endpoint = WsEndpoint::parse(&v).unwrap_or_else(|e| {
					eprintln!("{e}");
					usage_and_exit();
				});
				args.bind = Some(endpoint);
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				args.config = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	args
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,huddle_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("huddle_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

async fn build_directory(settings: &DirectorySettings) -> Arc<dyn DirectoryMirror> {
	if !settings.enabled {
		return Arc::new(NullDirectory);
	}

	#[cfg(feature = "redis-mirror")]
	if let Some(url) = settings.redis_url.as_deref() {
		match crate::server::directory::RedisDirectory::connect(url, settings.key_prefix.clone()).await {
			Ok(dir) => return Arc::new(dir),
			Err(e) => warn!(error = %e, "redis directory unavailable; using the in-memory mirror"),
		}
	}

	#[cfg(not(feature = "redis-mirror"))]
	if settings.redis_url.is_some() {
		warn!("directory.redis_url set but built without the redis-mirror feature; using the in-memory mirror");
	}

	Arc::new(InMemoryDirectory::new())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = match args.config {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let mut server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	if let Some(endpoint) = args.bind {
		server_cfg.server.bind = endpoint.hostport();
		server_cfg.server.ws_path = endpoint.path;
	}

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let health_state = HealthState::new();
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<std::net::SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let directory = build_directory(&server_cfg.directory).await;
	let hub = spawn_hub(&server_cfg.server.hub_config(), directory, health_state.clone());

	let listener = TcpListener::bind(server_cfg.server.bind.as_str())
		.await
		.with_context(|| format!("bind {}", server_cfg.server.bind))?;
	let local = listener.local_addr().context("listener local address")?;
	info!(
		bind = %local,
		path = %server_cfg.server.ws_path,
		"huddle_server: websocket endpoint ready"
	);

	health_state.mark_ready();

	serve(listener, hub, server_cfg.server.session_settings()).await;

	Ok(())
}
