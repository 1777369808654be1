use clap::Parser;
use tracing::error;
use zk_cli::{cli::Cli, commands, config, logging};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let result = match config::load(cli.config.as_deref(), cli.servers.as_deref(), cli.session_timeout) {
		Ok(config) => commands::dispatch(cli.command, config).await,
		Err(err) => Err(err),
	};
	if let Err(err) = result {
		error!(target = "zk.cli", error = %format!("{err:#}"), "command failed");
		eprintln!("error: {err:#}");
		std::process::exit(1);
	}
}
