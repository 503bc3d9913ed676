#![forbid(unsafe_code)]

pub mod endpoint {
	/// Path used when a `ws://` endpoint omits one.
	pub const DEFAULT_WS_PATH: &str = "/ws";

	/// Parsed `ws://host:port[/path]` endpoint.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct WsEndpoint {
		pub host: String,
		pub port: u16,
		pub path: String,
	}

	impl WsEndpoint {
		/// Returns `host:port` (host preserved, IPv6 stays bracketed).
		pub fn hostport(&self) -> String {
			format!("{}:{}", self.host, self.port)
		}

		/// Parse an endpoint string in the form `ws://host:port[/path]`.
		pub fn parse(s: &str) -> Result<Self, String> {
			let s = s.trim();
			if s.is_empty() {
				return Err("endpoint must be non-empty (expected ws://host:port/path)".to_string());
			}

			let rest = s
				.strip_prefix("ws://")
				.ok_or_else(|| format!("invalid endpoint (expected ws://host:port/path): {s}"))?;

			if rest.contains('?') || rest.contains('#') {
				return Err(format!("invalid endpoint (query/fragment not allowed): {s}"));
			}

			let (authority, path) = match rest.find('/') {
				Some(idx) => (&rest[..idx], &rest[idx..]),
				None => (rest, DEFAULT_WS_PATH),
			};

			let (host, port_str) = authority
				.rsplit_once(':')
				.ok_or_else(|| format!("invalid endpoint (missing :port, expected ws://host:port/path): {s}"))?;

			let host = host.trim();
			if host.is_empty() {
				return Err(format!("invalid endpoint host (expected ws://host:port/path): {s}"));
			}

			if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
				return Err(format!(
					"invalid endpoint host (IPv6 must be bracketed like ws://[::1]:7777/ws): {s}"
				));
			}

			let port: u16 = port_str
				.trim()
				.parse()
				.map_err(|_| format!("invalid endpoint port (expected 1..=65535): {s}"))?;

			if port == 0 {
				return Err(format!("invalid endpoint port (expected 1..=65535): {s}"));
			}

			if path.len() > 1 && path.ends_with('/') {
				return Err(format!("invalid endpoint path (trailing slash): {s}"));
			}

			Ok(Self {
				host: host.to_string(),
				port,
				path: path.to_string(),
			})
		}
	}

}
