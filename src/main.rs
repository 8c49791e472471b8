use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use agilereview::cli::Cli;
use agilereview::commands;
use agilereview::config::Config;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let config = match Config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    debug!(?config, "config loaded");

    let mut stdout = std::io::stdout().lock();
    if let Err(e) = commands::run(&cli.command, &config, &mut stdout) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
