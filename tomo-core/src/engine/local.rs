use super::device::GpuDevice;
use super::process::run_captured;
use super::{DoseEngine, EngineKind, EngineRun, classify};
use crate::config::EngineConfig;
use crate::error::{Result, TomoError};
use crate::job::orchestrator::DoseOptions;
use crate::stage::{SOLVER_CONFIG, StagedInputs};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

fn is_executable(p: &Path) -> bool {
    let Ok(md) = fs::metadata(p) else {
        return false;
    };
    if !md.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        md.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// First directory in `dirs` holding an executable `name`.
pub fn find_executable(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter().map(|d| d.join(name)).find(|p| is_executable(p))
}

fn remove_stale(p: &Path) -> io::Result<()> {
    match fs::remove_file(p) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Solver binaries on this machine, run as child processes.
pub struct LocalEngine {
    gpu: Option<PathBuf>,
    cpu: Option<PathBuf>,
    device: GpuDevice,
    timeout: Option<Duration>,
}

impl LocalEngine {
    pub fn new(
        gpu: Option<PathBuf>,
        cpu: Option<PathBuf>,
        device: GpuDevice,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            gpu,
            cpu,
            device,
            timeout,
        }
    }

    /// Look for either solver variant on the configured search path.
    pub fn probe(config: &EngineConfig) -> Option<Self> {
        let dirs: Vec<PathBuf> = match &config.search_path {
            Some(dirs) => dirs.clone(),
            None => env::var_os("PATH")
                .map(|p| env::split_paths(&p).collect())
                .unwrap_or_default(),
        };
        let gpu = find_executable(&config.gpu_executable, &dirs);
        let cpu = find_executable(&config.cpu_executable, &dirs);
        debug!(?gpu, ?cpu, "probed local dose engines");
        if gpu.is_none() && cpu.is_none() {
            return None;
        }
        if gpu.is_some() && config.gpu_reset.is_none() {
            warn!(
                "GPU solver found but no gpu_reset command is configured; device state is not cleared between runs"
            );
        }
        Some(Self::new(
            gpu,
            cpu,
            GpuDevice::new(config.gpu_reset.clone()),
            config.local_timeout_secs.map(Duration::from_secs),
        ))
    }

    pub fn has_gpu(&self) -> bool {
        self.gpu.is_some()
    }

    /// GPU binary unless the secondary engine is requested or missing.
    fn select(&self, options: &DoseOptions) -> Option<(&Path, bool)> {
        let gpu = self.gpu.as_deref().map(|p| (p, true));
        let cpu = self.cpu.as_deref().map(|p| (p, false));
        if options.use_secondary_engine {
            cpu.or(gpu)
        } else {
            gpu.or(cpu)
        }
    }
}

impl DoseEngine for LocalEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Local
    }

    fn run(&mut self, staged: &StagedInputs, options: &DoseOptions) -> Result<EngineRun> {
        let (exe, on_gpu) = self.select(options).ok_or(TomoError::EngineUnavailable)?;
        remove_stale(&staged.result())?;

        let mut cmd = Command::new(exe);
        cmd.arg(SOLVER_CONFIG).current_dir(&staged.dir);
        info!(exe = %exe.display(), dir = %staged.dir.display(), on_gpu, "running local dose engine");

        let captured = if on_gpu {
            let _guard = self.device.acquire()?;
            run_captured(cmd, &staged.log(), self.timeout)?
        } else {
            run_captured(cmd, &staged.log(), self.timeout)?
        };

        let ok = classify(&captured.output, captured.status.success());
        debug!(status = ?captured.status, ok, "local dose engine exited");
        Ok(EngineRun {
            output: captured.output,
            result: staged.result(),
            ok,
        })
    }
}
