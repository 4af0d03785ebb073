use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use mediacarve::utils::cancel::CancelFlag;

use cli::command::{Cli, Commands, LogFormat};
use cli::extract::cmd_extract;
use cli::scan::cmd_scan;

mod cli;
mod config;
mod input;
mod report;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let base_level = cli.loglevel.to_level_filter();

    let multi = MultiProgress::new();

    let mut env_builder = env_logger::Builder::from_default_env();
    env_builder.filter_level(base_level);
    match cli.log_format {
        LogFormat::Plain => {
            env_builder.format_timestamp_secs();
        }
        LogFormat::Json => {
            env_builder.format(|buf, record| {
                use std::io::Write;
                writeln!(
                    buf,
                    "{{\"ts\":\"{}\",\"lvl\":\"{}\",\"target\":\"{}\",\"msg\":{:?}}}",
                    buf.timestamp(),
                    record.level(),
                    record.target(),
                    record.args().to_string()
                )
            });
        }
    }

    let pb = if cli.progress {
        let logger = env_builder.build();
        LogWrapper::new(multi.clone(), logger).try_init()?;
        Some(&multi)
    } else {
        env_builder.try_init()?;
        None
    };

    log::debug!(
        "{} {} ({}), mediacarve {}, built {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_GIT_DESCRIBE").unwrap_or("unknown revision"),
        env!("MEDIACARVE_VERSION"),
        env!("BUILD_TIMESTAMP")
    );

    let config = config::load(cli.config.as_deref(), cli.strict)?;

    let cancel = CancelFlag::default();
    let handler = cancel.clone();
    ctrlc::set_handler(move || handler.cancel()).context("Failed to install the Ctrl-C handler")?;

    match cli.command {
        Commands::Scan(ref args) => cmd_scan(args, &cli, &config, &cancel, pb)?,
        Commands::Extract(ref args) => cmd_extract(args, &cli, &config, &cancel, pb)?,
    }

    Ok(())
}
