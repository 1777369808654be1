//! Client configuration for one CLI invocation.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use zk::ClientConfig;

/// Default for commands that would otherwise wait forever on a dead ensemble.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_SERVER: &str = "127.0.0.1:2181";

/// Reads `path` when given, then applies the command-line overrides.
pub fn load(path: Option<&Path>, servers: Option<&str>, session_timeout_ms: Option<u64>) -> Result<ClientConfig> {
	let mut config = match path {
		Some(path) => {
			let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read config file {}", path.display()))?;
			serde_json::from_str::<ClientConfig>(&raw).with_context(|| format!("invalid config file {}", path.display()))?
		}
		None => ClientConfig::default(),
	};

	if let Some(servers) = servers {
		config.servers = split_servers(servers);
		if config.servers.is_empty() {
			bail!("--servers must name at least one server");
		}
	}
	if config.servers.is_empty() {
		config.servers.push(DEFAULT_SERVER.to_string());
	}
	if let Some(ms) = session_timeout_ms {
		config.session_timeout = Duration::from_millis(ms);
	}
	config.request_timeout.get_or_insert(DEFAULT_REQUEST_TIMEOUT);

	config.validate().context("invalid client configuration")?;
	Ok(config)
}

fn split_servers(raw: &str) -> Vec<String> {
	raw.split(',').map(str::trim).filter(|server| !server.is_empty()).map(str::to_string).collect()
}
