use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "zk")]
#[command(about = "ZooKeeper client - inspect and edit an ensemble from the command line")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug, -vvv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// JSON client configuration file
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Comma-separated server list, overriding the config file
	#[arg(short, long, global = true, value_name = "HOST:PORT,...")]
	pub servers: Option<String>,

	/// Session timeout in milliseconds, overriding the config file
	#[arg(long, global = true, value_name = "MS")]
	pub session_timeout: Option<u64>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// List the children of a node
	Ls {
		path: String,
		/// Include the node's stat
		#[arg(long)]
		stat: bool,
	},

	/// Print a node's data and stat
	Get { path: String },

	/// Print a node's stat, or null when it does not exist
	Stat { path: String },

	/// Create a node
	Create {
		path: String,
		/// Node data (UTF-8)
		#[arg(default_value = "")]
		data: String,
		/// Delete the node when this session ends
		#[arg(short, long)]
		ephemeral: bool,
		/// Append a monotonically increasing suffix to the name
		#[arg(short = 'S', long)]
		sequential: bool,
	},

	/// Replace a node's data
	Set {
		path: String,
		data: String,
		/// Expected version; -1 matches any
		#[arg(long, default_value = "-1", allow_hyphen_values = true)]
		version: i32,
	},

	/// Delete a node
	#[command(alias = "delete")]
	Rm {
		path: String,
		/// Expected version; -1 matches any
		#[arg(long, default_value = "-1", allow_hyphen_values = true)]
		version: i32,
	},

	/// List ephemeral nodes whose path starts with a prefix
	Ephemerals {
		#[arg(default_value = "/")]
		prefix: String,
	},

	/// Wait for changes to a node and print each one
	Watch {
		path: String,
		/// Watch the child list instead of the data
		#[arg(long)]
		children: bool,
		/// Number of changes to report before exiting
		#[arg(short = 'n', long, default_value = "1")]
		count: usize,
	},
}
