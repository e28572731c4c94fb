use crate::error::{Result, TomoError};
use crate::policy::MidpointPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_MODEL_DIR: &str = "TOMO_MODEL_DIR";
pub const ENV_REMOTE_HOST: &str = "TOMO_REMOTE_HOST";
pub const ENV_REMOTE_USER: &str = "TOMO_REMOTE_USER";
pub const ENV_REMOTE_KEY: &str = "TOMO_REMOTE_KEY";

/// Beam model files every job needs next to its inputs.
pub const DEFAULT_MODEL_FILES: [&str; 5] = [
    "dcom.header",
    "fat.img",
    "kernel.img",
    "lft.img",
    "penumbra.img",
];

/// Connection parameters for a dose engine reachable over SSH.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    pub user: String,
    /// Private key file used to authenticate the session.
    pub identity: Option<PathBuf>,
    pub port: u16,
    /// Parent directory for session folders on the remote side.
    pub root: String,
    pub executable: String,
    /// OpenSSH client programs.
    pub ssh: String,
    pub scp: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: String::new(),
            identity: None,
            port: 22,
            root: ".".to_string(),
            executable: "sadose".to_string(),
            ssh: "ssh".to_string(),
            scp: "scp".to_string(),
        }
    }
}

impl RemoteConfig {
    pub fn destination(&self) -> String {
        if self.user.is_empty() {
            self.host.clone()
        } else {
            format!("{}@{}", self.user, self.host)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub gpu_executable: String,
    pub cpu_executable: String,
    /// Directories probed for the local executables; `PATH` when unset.
    pub search_path: Option<Vec<PathBuf>>,
    pub model_dir: PathBuf,
    pub model_files: Vec<String>,
    /// Parent of the staging directory; system temp dir when unset.
    pub staging_root: Option<PathBuf>,
    pub remote: Option<RemoteConfig>,
    /// Local runs wait for exit when unset.
    pub local_timeout_secs: Option<u64>,
    pub remote_timeout_secs: u64,
    /// Command run while acquiring the GPU before each local GPU job.
    pub gpu_reset: Option<Vec<String>>,
    pub midpoint_policy: MidpointPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gpu_executable: "gpusadose".to_string(),
            cpu_executable: "sadose".to_string(),
            search_path: None,
            model_dir: PathBuf::from("model"),
            model_files: DEFAULT_MODEL_FILES.iter().map(|s| s.to_string()).collect(),
            staging_root: None,
            remote: None,
            local_timeout_secs: None,
            remote_timeout_secs: 7200,
            gpu_reset: None,
            midpoint_policy: MidpointPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut cfg: EngineConfig = serde_json::from_str(&text)
            .map_err(|e| TomoError::Format(format!("{}: {e}", path.display())))?;
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        self.apply_vars(|k| env::var(k).ok().filter(|v| !v.is_empty()));
    }

    fn apply_vars(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = get(ENV_MODEL_DIR) {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(host) = get(ENV_REMOTE_HOST) {
            self.remote.get_or_insert_with(RemoteConfig::default).host = host;
        }
        if let Some(remote) = self.remote.as_mut() {
            if let Some(user) = get(ENV_REMOTE_USER) {
                remote.user = user;
            }
            if let Some(key) = get(ENV_REMOTE_KEY) {
                remote.identity = Some(PathBuf::from(key));
            }
        }
    }

    /// Remote parameters, if a host is configured.
    pub fn remote(&self) -> Option<&RemoteConfig> {
        self.remote.as_ref().filter(|r| !r.host.is_empty())
    }
}
