use super::process::run_captured;
use super::{DoseEngine, EngineKind, EngineRun, contains_error_marker};
use crate::config::RemoteConfig;
use crate::error::{Result, TomoError};
use crate::job::orchestrator::DoseOptions;
use crate::stage::{LOG, RESULT, SOLVER_CONFIG, StagedInputs};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use walkdir::WalkDir;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{debug, info, warn};

/// ssh exits with this when the connection itself failed.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Local log of the ssh call that drives the solver.
const SSH_LOG: &str = "ssh.log";
/// Remote file holding the solver's process id while it runs.
const SOLVER_PID: &str = "solver.pid";

/// Single-quote for the remote POSIX shell.
fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn session_id() -> String {
    let fmt = format_description!("[year][month][day]_[hour][minute][second]");
    let now = OffsetDateTime::now_utc();
    let stamp = now.format(fmt).unwrap_or_else(|_| now.unix_timestamp().to_string());
    let mut h = blake3::Hasher::new();
    h.update(stamp.as_bytes());
    h.update(&std::process::id().to_le_bytes());
    h.update(&now.nanosecond().to_le_bytes());
    format!("{stamp}_{}", hex::encode(&h.finalize().as_bytes()[..4]))
}

/// OpenSSH control-master connection, authenticated once and multiplexed
/// by every later ssh/scp call. Closed when dropped.
pub struct SshSession {
    ssh: String,
    scp: String,
    destination: String,
    port: u16,
    identity: Option<PathBuf>,
    socket: PathBuf,
    _control_dir: TempDir,
}

impl SshSession {
    pub fn open(remote: &RemoteConfig) -> Result<Self> {
        let control_dir = tempfile::Builder::new().prefix("tomo_ssh_").tempdir()?;
        let session = Self {
            ssh: remote.ssh.clone(),
            scp: remote.scp.clone(),
            destination: remote.destination(),
            port: remote.port,
            identity: remote.identity.clone(),
            socket: control_dir.path().join("master.sock"),
            _control_dir: control_dir,
        };

        let out = session
            .ssh()
            .args(["-M", "-f", "-N", "-o", "ControlPersist=yes"])
            .arg(&session.destination)
            .stdin(Stdio::null())
            .output()?;
        if !out.status.success() {
            warn!(
                host = %session.destination,
                stderr = %String::from_utf8_lossy(&out.stderr),
                "could not open remote session"
            );
            return Err(TomoError::EngineUnavailable);
        }

        let answer = session.exec("echo tomo-ok")?;
        if !String::from_utf8_lossy(&answer.stdout).contains("tomo-ok") {
            warn!(host = %session.destination, "remote session did not answer");
            return Err(TomoError::EngineUnavailable);
        }
        info!(host = %session.destination, "remote session open");
        Ok(session)
    }

    fn ssh(&self) -> Command {
        self.command(&self.ssh, "-p")
    }

    /// `ssh` or `scp` bound to the control socket. They disagree on the
    /// port flag.
    fn command(&self, program: &str, port_flag: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.socket.display()))
            .args(["-o", "BatchMode=yes", "-o", "ConnectTimeout=30"]);
        cmd.arg(port_flag).arg(self.port.to_string());
        if let Some(id) = &self.identity {
            cmd.arg("-i").arg(id);
        }
        cmd
    }

    pub fn exec(&self, remote_cmd: &str) -> Result<Output> {
        Ok(self
            .ssh()
            .arg(&self.destination)
            .arg(remote_cmd)
            .stdin(Stdio::null())
            .output()?)
    }

    fn scp(&self, from: &[String], to: &str) -> Result<()> {
        let out = self
            .command(&self.scp, "-P")
            .args(["-q", "-p"])
            .args(from)
            .arg(to)
            .stdin(Stdio::null())
            .output()?;
        if !out.status.success() {
            return Err(TomoError::Staging(format!(
                "scp to {to}: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(())
    }

    pub fn push(&self, files: &[PathBuf], remote_dir: &str) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let from: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
        self.scp(&from, &format!("{}:{}/", self.destination, remote_dir))
    }

    pub fn pull(&self, remote_path: &str, local: &Path) -> Result<()> {
        self.scp(
            &[format!("{}:{}", self.destination, remote_path)],
            &local.display().to_string(),
        )
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        let _ = self
            .ssh()
            .args(["-O", "exit"])
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        debug!(host = %self.destination, "remote session closed");
    }
}

/// Staged files that belong on the remote side, skipping run outputs.
fn mirror_set(staged: &StagedInputs) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for e in WalkDir::new(&staged.dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let e = e.map_err(|e| TomoError::Staging(format!("{}: {e}", staged.dir.display())))?;
        let output = [LOG, RESULT, SSH_LOG, SOLVER_PID].contains(&e.file_name().to_string_lossy().as_ref());
        if e.file_type().is_file() && !output {
            files.push(e.into_path());
        }
    }
    Ok(files)
}

/// Dose engine on another host, reached through one persistent session.
///
/// The remote folder is a mirror of the local staging directory. Only files
/// the stager rewrote are copied once a full copy has landed; a new remote
/// folder, a new staging directory or a failed copy forces everything over
/// again.
pub struct RemoteEngine {
    session: SshSession,
    root: String,
    executable: String,
    remote_dir: String,
    dir_ready: bool,
    mirrored: bool,
    timeout: Duration,
}

impl RemoteEngine {
    pub fn connect(remote: &RemoteConfig, timeout: Duration) -> Result<Self> {
        let session = SshSession::open(remote)?;
        let root = remote.root.trim_end_matches('/').to_string();
        Ok(Self {
            session,
            remote_dir: format!("{root}/tomo_{}", session_id()),
            root,
            executable: remote.executable.clone(),
            dir_ready: false,
            mirrored: false,
            timeout,
        })
    }

    pub fn remote_dir(&self) -> &str {
        &self.remote_dir
    }

    fn ensure_dir(&mut self) -> Result<()> {
        if self.dir_ready {
            return Ok(());
        }
        let out = self
            .session
            .exec(&format!("mkdir -p {}", sh_quote(&self.remote_dir)))?;
        if !out.status.success() {
            return Err(TomoError::Staging(format!(
                "mkdir {}: {}",
                self.remote_dir,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        self.dir_ready = true;
        Ok(())
    }

    fn push_inputs(&mut self, staged: &StagedInputs) -> Result<()> {
        let files = if self.mirrored && !staged.fresh {
            staged.written.iter().map(|n| staged.path(n)).collect()
        } else {
            mirror_set(staged)?
        };
        self.mirrored = false;
        self.session.push(&files, &self.remote_dir)?;
        self.mirrored = true;
        debug!(files = files.len(), dir = %self.remote_dir, "mirrored staged inputs");
        Ok(())
    }

    /// Kill the solver a timed out call left behind and switch to a new
    /// remote folder.
    fn abandon_run(&mut self) {
        let dir = sh_quote(&self.remote_dir);
        match self
            .session
            .exec(&format!("cd {dir} && kill $(cat {SOLVER_PID}) 2>/dev/null; rm -f {SOLVER_PID}"))
        {
            Ok(out) if out.status.success() => debug!(dir = %self.remote_dir, "remote solver killed"),
            Ok(_) => warn!(dir = %self.remote_dir, "remote solver was not running"),
            Err(e) => warn!(dir = %self.remote_dir, error = %e, "could not kill remote solver"),
        }
        self.remote_dir = format!("{}/tomo_{}", self.root, session_id());
        self.dir_ready = false;
        self.mirrored = false;
        info!(dir = %self.remote_dir, "switched to a new remote folder");
    }
}

impl DoseEngine for RemoteEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Remote
    }

    fn run(&mut self, staged: &StagedInputs, _options: &DoseOptions) -> Result<EngineRun> {
        self.ensure_dir()?;
        self.push_inputs(staged)?;

        let dir = sh_quote(&self.remote_dir);
        let remote_cmd = format!(
            "cd {dir} && rm -f {RESULT} && {{ {} {SOLVER_CONFIG} > {LOG} 2>&1 & echo $! > {SOLVER_PID}; wait $!; }}",
            self.executable
        );
        info!(dir = %self.remote_dir, "running remote dose engine");
        let mut cmd = self.session.ssh();
        cmd.arg(&self.session.destination).arg(&remote_cmd);
        let ssh = match run_captured(cmd, &staged.path(SSH_LOG), Some(self.timeout)) {
            Err(TomoError::Timeout { secs }) => {
                self.abandon_run();
                return Err(TomoError::Timeout { secs });
            }
            other => other?,
        };
        if ssh.status.code() == Some(SSH_CONNECTION_FAILURE) {
            return Err(TomoError::Staging(format!(
                "remote session failed: {}",
                ssh.output.trim()
            )));
        }

        self.session
            .pull(&format!("{}/{LOG}", self.remote_dir), &staged.log())?;
        let output = String::from_utf8_lossy(&std::fs::read(staged.log())?).into_owned();
        let ok = !contains_error_marker(&output);
        if ok {
            self.session
                .pull(&format!("{}/{RESULT}", self.remote_dir), &staged.result())?;
        }
        Ok(EngineRun {
            output,
            result: staged.result(),
            ok,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_survives_single_quotes() {
        assert_eq!(sh_quote("a b"), "'a b'");
        assert_eq!(sh_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn full_mirror_skips_run_outputs() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["plan.img", "ct.img", LOG, RESULT, SSH_LOG, SOLVER_PID] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let staged = StagedInputs {
            dir: dir.path().to_path_buf(),
            written: vec![],
            fresh: false,
        };
        let names: Vec<String> = mirror_set(&staged)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["ct.img", "plan.img"]);
    }

    #[test]
    fn session_id_is_path_safe() {
        let a = session_id();
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        assert_eq!(a.len(), "20260101_000000_".len() + 8);
    }
}
