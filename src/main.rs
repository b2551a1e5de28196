mod cli;
mod compare;
mod config;
mod diff;
mod dispatch;
mod evaluate;
mod health;
mod listener;
mod logging;
mod model;
mod normalize;
mod source;
mod storage;

use std::process;

use clap::Parser;

use cli::Cli;
use config::Config;

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = cli::run(cli, &config) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
