use anyhow::{Context, Result};
use zk::Client;

use crate::output::{self, Ephemerals};

pub async fn execute(client: &Client, prefix: &str) -> Result<()> {
	let nodes = client.get_ephemerals(prefix).await.with_context(|| format!("failed to list ephemerals under {prefix}"))?;
	output::print_json(&Ephemerals {
		prefix: prefix.to_string(),
		nodes,
	})
}
