use crate::error::{Result, TomoError};
use std::fs::{self, File};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;
use tracing::warn;

#[derive(Debug)]
pub struct Captured {
    pub output: String,
    pub status: ExitStatus,
}

/// Run `cmd` with stdout and stderr both redirected into `log`, then read
/// the log back. With a timeout the child is killed once it is exceeded.
pub fn run_captured(cmd: Command, log: &Path, timeout: Option<Duration>) -> Result<Captured> {
    let out = File::create(log)?;
    let err = out.try_clone()?;
    let mut cmd = tokio::process::Command::from(cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(out))
        .stderr(Stdio::from(err))
        .kill_on_drop(true);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let status = rt.block_on(wait_child(cmd, timeout))?;

    let bytes = fs::read(log)?;
    Ok(Captured {
        output: String::from_utf8_lossy(&bytes).into_owned(),
        status,
    })
}

async fn wait_child(mut cmd: tokio::process::Command, timeout: Option<Duration>) -> Result<ExitStatus> {
    let mut child = cmd.spawn()?;
    let Some(limit) = timeout else {
        return Ok(child.wait().await?);
    };
    let waited = tokio::time::timeout(limit, child.wait()).await;
    match waited {
        Ok(status) => Ok(status?),
        Err(_) => {
            warn!(secs = limit.as_secs(), "engine timed out; killing");
            let _ = child.kill().await;
            Err(TomoError::Timeout {
                secs: limit.as_secs(),
            })
        }
    }
}
