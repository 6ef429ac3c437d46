use std::process::ExitCode;

use clap::Parser;

use daemon::Config;

fn main() -> ExitCode {
    let config = Config::parse();
    daemon::init_logging(&config.log_filter);

    if let Err(error) = daemon::run(&config) {
        tracing::error!(%error, "daemon failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
