mod annotate;
mod app;
mod error;
mod export;
mod io;
mod tree;
mod ui;

use app::{AppConfig, TreeMetaApp};
use clap::Parser;

fn main() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .try_init();

    let config = AppConfig::parse();
    if let Err(err) = TreeMetaApp::run(&config) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
