mod ephemerals;
mod node;
mod watch;

use anyhow::{Context, Result};
use tracing::{debug, info};
use zk::{Client, ClientConfig};

use crate::cli::Commands;

pub async fn dispatch(command: Commands, config: ClientConfig) -> Result<()> {
	info!(target = "zk.cli", servers = ?config.servers, "connecting");
	let (client, _events) = Client::builder().config(config).connect().await.context("failed to start session")?;

	let result = run(&client, command).await;
	client.close().await;
	debug!(target = "zk.cli", "session closed");
	result
}

async fn run(client: &Client, command: Commands) -> Result<()> {
	match command {
		Commands::Ls { path, stat } => node::ls(client, &path, stat).await,
		Commands::Get { path } => node::get(client, &path).await,
		Commands::Stat { path } => node::stat(client, &path).await,
		Commands::Create {
			path,
			data,
			ephemeral,
			sequential,
		} => node::create(client, &path, data, ephemeral, sequential).await,
		Commands::Set { path, data, version } => node::set(client, &path, data, version).await,
		Commands::Rm { path, version } => node::rm(client, &path, version).await,
		Commands::Ephemerals { prefix } => ephemerals::execute(client, &prefix).await,
		Commands::Watch { path, children, count } => watch::execute(client, &path, children, count).await,
	}
}
