use anyhow::{Context, Result};
use tracing::debug;
use zk::{Client, WatchReceiver};

use crate::output::{self, Change};

/// Re-arms after every change until `count` changes were printed.
pub async fn execute(client: &Client, path: &str, children: bool, count: usize) -> Result<()> {
	for sequence in 1..=count {
		let receiver = arm(client, path, children).await?;
		debug!(target = "zk.cli", %path, children, sequence, "watch armed");
		let event = receiver.recv().await.with_context(|| format!("watch on {path} ended"))?;
		output::print_json(&Change { sequence, event: &event })?;
	}
	Ok(())
}

async fn arm(client: &Client, path: &str, children: bool) -> Result<WatchReceiver> {
	let receiver = if children {
		client.children_w(path).await.map(|(_, receiver)| receiver)
	} else {
		client.exists_w(path).await.map(|(_, receiver)| receiver)
	};
	receiver.with_context(|| format!("failed to watch {path}"))
}
