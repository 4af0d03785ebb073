use std::path::PathBuf;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};
use mediacarve::formats::FormatId;

#[derive(Debug, ClapParser)]
#[command(
    name       = env!("CARGO_PKG_NAME"),
    version    = env!("CARGO_PKG_VERSION"),
    author     = env!("CARGO_PKG_AUTHORS"),
    about      = "Tools for carving MPEG video, H.264 and MPEG systems streams out of raw data",
    long_about = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Reject headers on warnings, not only on errors.
    #[arg(long, global = true)]
    pub strict: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show progress bars during operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// YAML file with carver settings.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Formats to carve (mpeg2, h264, mpegps). All formats when omitted.
    #[arg(
        long = "format",
        global = true,
        value_name = "FORMAT",
        value_delimiter = ',',
        value_parser = parse_format
    )]
    pub formats: Vec<FormatId>,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Formats selected on the command line, in scan order.
    pub fn selected_formats(&self) -> Vec<FormatId> {
        if self.formats.is_empty() {
            return FormatId::ALL.to_vec();
        }
        let mut formats = Vec::new();
        for &format in &self.formats {
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        formats
    }
}

fn parse_format(key: &str) -> Result<FormatId, String> {
    FormatId::from_key(key).ok_or_else(|| {
        let known: Vec<_> = FormatId::ALL.iter().map(|f| f.key()).collect();
        format!("unknown format '{key}', expected one of {}", known.join(", "))
    })
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the blocks found in the input.
    Scan(ScanArgs),

    /// Write every carved block and demultiplexed stream to files.
    Extract(ExtractArgs),
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Input file or disk image (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Print the header tree of every block.
    #[arg(long)]
    pub tree: bool,

    /// Report format.
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub output: ReportFormat,
}

#[derive(Debug, Args)]
pub struct ExtractArgs {
    /// Input file or disk image (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Directory the carved files are written to.
    #[arg(long, value_name = "DIR")]
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    /// Convert LogLevel to log::LevelFilter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum ReportFormat {
    /// One line per block.
    Text,
    /// A YAML document with every block and its headers.
    Yaml,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_selection() {
        let cli = Cli::parse_from(["mediacarved", "--format", "h264,mpegps,h264", "scan", "image.dd"]);
        assert_eq!(cli.selected_formats(), vec![FormatId::H264, FormatId::MpegSystem]);

        let cli = Cli::parse_from(["mediacarved", "scan", "image.dd", "--tree"]);
        assert_eq!(cli.selected_formats(), FormatId::ALL.to_vec());
        assert!(matches!(cli.command, Commands::Scan(ScanArgs { tree: true, .. })));

        assert!(Cli::try_parse_from(["mediacarved", "--format", "avi", "scan", "image.dd"]).is_err());
    }
}
