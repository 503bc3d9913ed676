#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use huddle_protocol::DEFAULT_MAX_FRAME_SIZE;
use huddle_util::endpoint::DEFAULT_WS_PATH;
use serde::Deserialize;
use tracing::{info, warn};

use crate::server::hub::HubConfig;
use crate::server::identity::DEFAULT_NAME_RETRY_LIMIT;
use crate::server::session::SessionSettings;

pub const DEFAULT_BIND: &str = "127.0.0.1:7777";

/// Default config path: `~/.huddle/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".huddle").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());

	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub directory: DirectorySettings,
}

/// Listener, transport and hub settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Listen address (host:port).
	pub bind: String,
	/// Path accepted for the WebSocket upgrade.
	pub ws_path: String,
	/// Largest accepted frame/message in bytes.
	pub max_frame_bytes: usize,
	pub idle_timeout: Duration,
	/// Per-connection outbound queue depth.
	pub outbound_queue_capacity: usize,
	/// Depth of the session → hub event queue.
	pub hub_queue_capacity: usize,
	/// Random display-name candidates tried before the suffixed fallback.
	pub name_retry_limit: u32,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			bind: DEFAULT_BIND.to_string(),
			ws_path: DEFAULT_WS_PATH.to_string(),
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			idle_timeout: Duration::from_secs(60),
			outbound_queue_capacity: 1024,
			hub_queue_capacity: 4096,
			name_retry_limit: DEFAULT_NAME_RETRY_LIMIT,
			metrics_bind: None,
			health_bind: None,
		}
	}
}

impl ServerSettings {
	pub fn session_settings(&self) -> SessionSettings {
		SessionSettings {
			ws_path: self.ws_path.clone(),
			max_frame_bytes: self.max_frame_bytes,
			idle_timeout: self.idle_timeout,
			outbound_queue_capacity: self.outbound_queue_capacity,
		}
	}

	pub fn hub_config(&self) -> HubConfig {
		HubConfig {
			queue_capacity: self.hub_queue_capacity,
			name_retry_limit: self.name_retry_limit,
			max_frame_bytes: self.max_frame_bytes,
			..HubConfig::default()
		}
	}
}

/// External directory mirror settings.
#[derive(Debug, Clone, Default)]
pub struct DirectorySettings {
	pub enabled: bool,
	pub redis_url: Option<String>,
	/// Prepended to every key the mirror writes.
	pub key_prefix: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	directory: FileDirectorySettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	bind: Option<String>,
	ws_path: Option<String>,
	max_frame_bytes: Option<usize>,
	idle_timeout_secs: Option<u64>,
	outbound_queue_capacity: Option<usize>,
	hub_queue_capacity: Option<usize>,
	name_retry_limit: Option<u32>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileDirectorySettings {
	enabled: Option<bool>,
	redis_url: Option<String>,
	key_prefix: Option<String>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = ServerSettings::default();

		Self {
			server: ServerSettings {
				bind: file.server.bind.filter(|s| !s.trim().is_empty()).unwrap_or(defaults.bind),
				ws_path: file
					.server
					.ws_path
					.filter(|s| s.starts_with('/'))
					.unwrap_or(defaults.ws_path),
				max_frame_bytes: file
					.server
					.max_frame_bytes
					.filter(|v| *v > 0)
					.unwrap_or(defaults.max_frame_bytes),
				idle_timeout: file
					.server
					.idle_timeout_secs
					.filter(|v| *v > 0)
					.map(Duration::from_secs)
					.unwrap_or(defaults.idle_timeout),
				outbound_queue_capacity: file
					.server
					.outbound_queue_capacity
					.filter(|v| *v > 0)
					.unwrap_or(defaults.outbound_queue_capacity),
				hub_queue_capacity: file
					.server
					.hub_queue_capacity
					.filter(|v| *v > 0)
					.unwrap_or(defaults.hub_queue_capacity),
				name_retry_limit: file
					.server
					.name_retry_limit
					.filter(|v| *v > 0)
					.unwrap_or(defaults.name_retry_limit),
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
			},
			directory: DirectorySettings {
				enabled: file.directory.enabled.unwrap_or(false),
				redis_url: file.directory.redis_url.filter(|s| !s.trim().is_empty()),
				key_prefix: file.directory.key_prefix.unwrap_or_default(),
			},
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => Ok(Some(parse_toml(&s)?)),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn parse_toml(s: &str) -> anyhow::Result<FileConfig> {
	toml::from_str(s).context("parse TOML")
}

fn apply_env_overrides(cfg: &mut ServerConfig, env: impl Fn(&str) -> Option<String>) {
	let non_empty = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

	if let Some(v) = non_empty("HUDDLE_BIND") {
		cfg.server.bind = v;
		info!("server config: bind overridden by env");
	}

	if let Some(v) = non_empty("HUDDLE_WS_PATH") {
		if v.starts_with('/') {
			cfg.server.ws_path = v;
			info!("server config: ws_path overridden by env");
		} else {
			warn!(ws_path = %v, "server config: HUDDLE_WS_PATH must start with '/'; ignored");
		}
	}

	if let Some(bytes) = non_empty("HUDDLE_MAX_FRAME_BYTES").and_then(|v| v.parse::<usize>().ok())
		&& bytes > 0
	{
		cfg.server.max_frame_bytes = bytes;
		info!(bytes, "server config: max_frame_bytes overridden by env");
	}

	if let Some(secs) = non_empty("HUDDLE_IDLE_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok())
		&& secs > 0
	{
		cfg.server.idle_timeout = Duration::from_secs(secs);
		info!(secs, "server config: idle_timeout overridden by env");
	}

	if let Some(capacity) = non_empty("HUDDLE_OUTBOUND_QUEUE_CAPACITY").and_then(|v| v.parse::<usize>().ok())
		&& capacity > 0
	{
		cfg.server.outbound_queue_capacity = capacity;
		info!(capacity, "server config: outbound_queue_capacity overridden by env");
	}

	if let Some(capacity) = non_empty("HUDDLE_HUB_QUEUE_CAPACITY").and_then(|v| v.parse::<usize>().ok())
		&& capacity > 0
	{
		cfg.server.hub_queue_capacity = capacity;
		info!(capacity, "server config: hub_queue_capacity overridden by env");
	}

	if let Some(limit) = non_empty("HUDDLE_NAME_RETRY_LIMIT").and_then(|v| v.parse::<u32>().ok())
		&& limit > 0
	{
		cfg.server.name_retry_limit = limit;
		info!(limit, "server config: name_retry_limit overridden by env");
	}

	if let Some(v) = non_empty("HUDDLE_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = non_empty("HUDDLE_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(enabled) = non_empty("HUDDLE_DIRECTORY_ENABLED").and_then(|v| parse_env_bool(&v)) {
		cfg.directory.enabled = enabled;
		info!(enabled, "directory: enabled overridden by env");
	}

	if let Some(v) = non_empty("HUDDLE_DIRECTORY_REDIS_URL") {
		cfg.directory.redis_url = Some(v);
		info!("directory: redis_url overridden by env");
	}

	if let Some(v) = env("HUDDLE_DIRECTORY_KEY_PREFIX") {
		cfg.directory.key_prefix = v.trim().to_string();
		info!("directory: key_prefix overridden by env");
	}

	if cfg.directory.enabled && cfg.directory.redis_url.is_none() {
		warn!("directory: enabled without redis_url; falling back to the in-memory mirror");
	}
}
