use std::process::ExitCode;

use clap::Parser;

use tilepaint::cli::{self, CliArgs};
use tilepaint::logger;
use tilepaint::settings::EngineSettings;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let settings = EngineSettings::load();
    logger::init(settings.log_level, settings.log_to_file);
    log::info!("tilepaint {} starting", env!("CARGO_PKG_VERSION"));
    cli::run(args, settings)
}
