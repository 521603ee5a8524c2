mod cli;
mod commands;
mod config;
mod logging;

use cli::{Cli, Command};
use config::Config;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse(std::env::args().skip(1))?;
    let cfg = Config::load(cli.config.as_deref())?;
    logging::init(logging::level(cli.verbosity, cfg.log_level.as_deref()))?;

    match &cli.command {
        Command::Play { path } => commands::play(&cfg, path),
        Command::Cap { path, seconds } => commands::cap(&cfg, path, *seconds),
        Command::Duplex { seconds } => commands::duplex(&cfg, *seconds),
        Command::Params { direction } => commands::params(&cfg, *direction),
        Command::Card { id } => commands::card(id),
    }
}
