// Logging setup for the CLI
use std::io::Write;

/// Initialize env_logger from the verbosity flags
pub fn init_logger(verbose: bool, quiet: bool) {
    // RUST_LOG takes over completely when set
    if std::env::var("RUST_LOG").is_ok() {
        env_logger::init();
        return;
    }

    let default_level = if quiet {
        log::LevelFilter::Error
    } else if verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(default_level).format(|buf, record| match record.level() {
        log::Level::Error => writeln!(buf, "ERROR: {}", record.args()),
        log::Level::Warn => writeln!(buf, "WARNING: {}", record.args()),
        log::Level::Info => writeln!(buf, "{}", record.args()),
        // Debug and trace keep the level tag
        level => writeln!(buf, "[{}] {}", level, record.args()),
    });

    if verbose {
        builder.filter_module("bisect_builds", log::LevelFilter::Debug);
        builder.filter_module("reqwest", log::LevelFilter::Info);
        builder.filter_module("hyper", log::LevelFilter::Info);
        builder.filter_module("h2", log::LevelFilter::Info);
        builder.filter_module("tokio", log::LevelFilter::Info);
    }

    builder.init();
}
