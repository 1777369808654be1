use anyhow::{Context, Result};
use tracing::info;
use zk::{Acl, Client, CreateFlags};

use crate::output::{self, Children, Created, NodeData, Removed};

pub async fn ls(client: &Client, path: &str, with_stat: bool) -> Result<()> {
	let (children, stat) = if with_stat {
		let (children, stat) = client.children2(path).await.with_context(|| format!("failed to list {path}"))?;
		(children, Some(stat))
	} else {
		(client.children(path).await.with_context(|| format!("failed to list {path}"))?, None)
	};
	output::print_json(&Children {
		path: path.to_string(),
		children,
		stat,
	})
}

pub async fn get(client: &Client, path: &str) -> Result<()> {
	let (data, stat) = client.get(path).await.with_context(|| format!("failed to read {path}"))?;
	output::print_json(&NodeData::new(path, &data, stat))
}

pub async fn stat(client: &Client, path: &str) -> Result<()> {
	let stat = client.exists(path).await.with_context(|| format!("failed to stat {path}"))?;
	output::print_json(&stat)
}

pub async fn create(client: &Client, path: &str, data: String, ephemeral: bool, sequential: bool) -> Result<()> {
	let mut flags = CreateFlags::PERSISTENT;
	if ephemeral {
		flags = flags | CreateFlags::EPHEMERAL;
	}
	if sequential {
		flags = flags | CreateFlags::SEQUENTIAL;
	}
	let created = client
		.create(path, data.into_bytes(), flags, Acl::world_all())
		.await
		.with_context(|| format!("failed to create {path}"))?;
	info!(target = "zk.cli", path = %created, ephemeral, "node created");
	output::print_json(&Created { path: created })
}

pub async fn set(client: &Client, path: &str, data: String, version: i32) -> Result<()> {
	let bytes = data.into_bytes();
	let stat = client.set(path, bytes.clone(), version).await.with_context(|| format!("failed to write {path}"))?;
	output::print_json(&NodeData::new(path, &bytes, stat))
}

pub async fn rm(client: &Client, path: &str, version: i32) -> Result<()> {
	client.delete(path, version).await.with_context(|| format!("failed to delete {path}"))?;
	info!(target = "zk.cli", %path, "node deleted");
	output::print_json(&Removed { path: path.to_string() })
}
