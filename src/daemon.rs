use crate::config::Settings;
use anyhow::{Context, Result};

#[cfg(unix)]
use daemonize::Daemonize;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
#[cfg(unix)]
use std::fs::File;
#[cfg(unix)]
use std::path::Path;

/// Detaches from the terminal. stdout and stderr, and with them the log
/// output, go to `bgdl.log` in the staging directory.
#[cfg(unix)]
pub fn start_daemon(settings: &Settings) -> Result<()> {
    std::fs::create_dir_all(&settings.staging_dir).context("Failed to create staging directory")?;

    let stdout = File::create(settings.log_file()).context("Failed to create log file")?;
    let stderr = stdout.try_clone().context("Failed to clone log file handle")?;

    let daemonize = Daemonize::new()
        .pid_file(settings.pid_file())
        .chown_pid_file(true)
        .working_directory(&settings.staging_dir)
        .stdout(stdout)
        .stderr(stderr);

    daemonize
        .start()
        .map_err(|e| anyhow::anyhow!("Error starting daemon: {}", e))
}

#[cfg(unix)]
pub fn get_daemon_pid(pid_file: &Path) -> Result<Option<i32>> {
    if !pid_file.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(pid_file)?;
    let pid = content.trim().parse::<i32>().context("Malformed pid file")?;
    Ok(Some(pid))
}

#[cfg(unix)]
pub fn stop_daemon(settings: &Settings) -> Result<()> {
    let pid_file = settings.pid_file();
    match get_daemon_pid(&pid_file)? {
        Some(pid) => {
            signal::kill(Pid::from_raw(pid), Signal::SIGTERM)
                .with_context(|| format!("Failed to signal daemon (PID: {})", pid))?;
            println!("Stopped daemon (PID: {})", pid);
            println!("The pending transfer resumes on the next run.");
            let _ = std::fs::remove_file(pid_file);
        }
        None => println!("Daemon is not running."),
    }
    Ok(())
}

#[cfg(unix)]
pub fn cleanup_pid_file(settings: &Settings) {
    let _ = std::fs::remove_file(settings.pid_file());
}

#[cfg(not(unix))]
pub fn cleanup_pid_file(_settings: &Settings) {}
