use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod check_cmd;
mod cli;
mod groups_cmd;
mod probe_cmd;

use cli::{Cli, Command};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Probe(args) => probe_cmd::run_probe(args),
        Command::Check(args) => check_cmd::run_check(args),
        Command::Groups(args) => groups_cmd::run_groups(args),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("FWPROBE_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
