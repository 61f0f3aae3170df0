use anyhow::{Context, Result};
use bgdl::cli::Args;
use bgdl::config::Settings;
use bgdl::logging::init_logging;
use clap::Parser;

fn main() -> Result<()> {
    let args = Args::parse();

    // Resolve paths to absolute before daemonizing to avoid issues with working directory
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let settings = Settings::from_args(&args, &cwd);

    // Handle synchronous commands (status, follow, stop) BEFORE starting the download runtime
    if args.status || args.follow || args.stop {
        let rt = tokio::runtime::Runtime::new()?;
        return rt.block_on(async { handle_sync_commands(&args, &settings).await });
    }

    #[cfg(unix)]
    if args.daemon {
        bgdl::daemon::start_daemon(&settings)?;
    }

    init_logging(args.verbose);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move { bgdl::commands::run(settings, args.url, args.daemon).await })
}

async fn handle_sync_commands(args: &Args, settings: &Settings) -> Result<()> {
    #[cfg(unix)]
    if args.stop {
        return bgdl::daemon::stop_daemon(settings);
    }

    if args.follow {
        return bgdl::commands::follow_status(settings).await;
    }

    bgdl::commands::show_status(settings).await
}
