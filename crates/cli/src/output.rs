//! JSON documents printed by the commands.

use anyhow::Result;
use serde::Serialize;
use zk::{Stat, WatchedEvent};

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}

#[derive(Debug, Serialize)]
pub struct NodeData {
	pub path: String,
	/// Data as UTF-8, lossily decoded.
	pub data: String,
	pub stat: Stat,
}

impl NodeData {
	pub fn new(path: &str, data: &[u8], stat: Stat) -> Self {
		Self {
			path: path.to_string(),
			data: String::from_utf8_lossy(data).into_owned(),
			stat,
		}
	}
}

#[derive(Debug, Serialize)]
pub struct Children {
	pub path: String,
	pub children: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stat: Option<Stat>,
}

#[derive(Debug, Serialize)]
pub struct Created {
	pub path: String,
}

#[derive(Debug, Serialize)]
pub struct Ephemerals {
	pub prefix: String,
	pub nodes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Change<'a> {
	pub sequence: usize,
	#[serde(flatten)]
	pub event: &'a WatchedEvent,
}

#[derive(Debug, Serialize)]
pub struct Removed {
	pub path: String,
}
