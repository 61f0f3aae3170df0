use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bgdl")]
#[command(author, version, about = "Single-slot background downloader", long_about = None)]
pub struct Args {
    /// URL to download. Omit to resume a transfer left pending by a previous run
    #[arg(index = 1)]
    pub url: Option<String>,

    /// Directory finished downloads are stored in
    #[arg(short = 'o', long = "download-dir", env = "BGDL_DOWNLOAD_DIR", default_value = "downloads")]
    pub download_dir: PathBuf,

    /// Directory for partial downloads, the session record, pid and log files
    /// [default: <download-dir>/.bgdl]
    #[arg(long = "staging-dir", env = "BGDL_STAGING_DIR")]
    pub staging_dir: Option<PathBuf>,

    /// Seconds without progress before a transfer is abandoned (0 disables)
    #[arg(long = "stall-timeout", env = "BGDL_STALL_TIMEOUT", default_value_t = 300)]
    pub stall_timeout: u64,

    /// Seconds allowed for establishing a connection
    #[arg(long = "connect-timeout", default_value_t = 10)]
    pub connect_timeout: u64,

    /// Run in background (daemon mode) [Unix only]
    #[arg(short = 'd', long)]
    pub daemon: bool,

    /// Stop the daemon process [Unix only]
    #[arg(short = 'x', long)]
    pub stop: bool,

    /// Show the pending transfer and stored files
    #[arg(short = 'l', long)]
    pub status: bool,

    /// Keep refreshing the status view
    #[arg(short = 'f', long)]
    pub follow: bool,

    /// Log at debug level (BGDL_LOG overrides)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}
