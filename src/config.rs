use crate::cli::Args;
use std::path::{Path, PathBuf};
use std::time::Duration;

const USER_AGENT: &str = concat!("bgdl/", env!("CARGO_PKG_VERSION"));

/// Resolved runtime settings shared by the session and the coordinator.
#[derive(Debug, Clone)]
pub struct Settings {
    pub download_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub stall_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Settings {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        let download_dir = download_dir.into();
        Self {
            staging_dir: default_staging_dir(&download_dir),
            download_dir,
            stall_timeout: Some(Duration::from_secs(300)),
            connect_timeout: Duration::from_secs(10),
            user_agent: USER_AGENT.to_string(),
        }
    }

    /// Builds settings from the command line, anchoring relative paths at
    /// `cwd` so they survive the daemon changing directory.
    pub fn from_args(args: &Args, cwd: &Path) -> Self {
        let download_dir = absolutize(&args.download_dir, cwd);
        let staging_dir = args
            .staging_dir
            .as_deref()
            .map(|dir| absolutize(dir, cwd))
            .unwrap_or_else(|| default_staging_dir(&download_dir));

        Self {
            download_dir,
            staging_dir,
            stall_timeout: (args.stall_timeout > 0).then(|| Duration::from_secs(args.stall_timeout)),
            connect_timeout: Duration::from_secs(args.connect_timeout),
            user_agent: USER_AGENT.to_string(),
        }
    }

    /// How often the watchdog checks for a stalled transfer.
    pub fn watchdog_period(&self) -> Duration {
        self.stall_timeout
            .map(|timeout| (timeout / 4).clamp(Duration::from_millis(100), Duration::from_secs(5)))
            .unwrap_or(Duration::from_secs(5))
    }

    pub fn pid_file(&self) -> PathBuf {
        self.staging_dir.join("bgdl.pid")
    }

    pub fn log_file(&self) -> PathBuf {
        self.staging_dir.join("bgdl.log")
    }
}

fn default_staging_dir(download_dir: &Path) -> PathBuf {
    download_dir.join(".bgdl")
}

fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_relative() {
        cwd.join(path)
    } else {
        path.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults_resolve_under_cwd() {
        let args = Args::try_parse_from(["bgdl", "http://host/pic.jpg"]).unwrap();
        let settings = Settings::from_args(&args, Path::new("/work"));

        assert_eq!(settings.download_dir, PathBuf::from("/work/downloads"));
        assert_eq!(settings.staging_dir, PathBuf::from("/work/downloads/.bgdl"));
        assert_eq!(settings.stall_timeout, Some(Duration::from_secs(300)));
        assert_eq!(settings.pid_file(), PathBuf::from("/work/downloads/.bgdl/bgdl.pid"));
    }

    #[test]
    fn test_zero_stall_timeout_disables_watchdog() {
        let args = Args::try_parse_from(["bgdl", "--stall-timeout", "0", "-o", "/data"]).unwrap();
        let settings = Settings::from_args(&args, Path::new("/work"));

        assert_eq!(settings.stall_timeout, None);
        assert_eq!(settings.download_dir, PathBuf::from("/data"));
        assert_eq!(settings.watchdog_period(), Duration::from_secs(5));
    }

    #[test]
    fn test_watchdog_period_is_bounded() {
        let mut settings = Settings::new("/data");
        settings.stall_timeout = Some(Duration::from_secs(2));
        assert_eq!(settings.watchdog_period(), Duration::from_millis(500));
        settings.stall_timeout = Some(Duration::from_secs(3600));
        assert_eq!(settings.watchdog_period(), Duration::from_secs(5));
    }
}
