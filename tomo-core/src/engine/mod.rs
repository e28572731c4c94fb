pub mod device;
pub mod local;
pub mod process;
pub mod remote;

use crate::config::EngineConfig;
use crate::error::{Result, TomoError};
use crate::job::orchestrator::DoseOptions;
use crate::stage::StagedInputs;
use local::LocalEngine;
use remote::RemoteEngine;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Marker the engine prints on failure.
///
/// Matched case-insensitively as a plain substring, with no word
/// boundaries. Any log line containing it fails the run, including
/// benign text such as `errors: 0` or `terror`, so the solver must keep
/// the word out of its normal output.
pub const ERROR_MARKER: &str = "error";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
    None,
    Local,
    Remote,
}

/// Outcome of one engine invocation.
#[derive(Clone, Debug)]
pub struct EngineRun {
    /// Combined stdout/stderr, or the remote log.
    pub output: String,
    pub result: PathBuf,
    pub ok: bool,
}

pub trait DoseEngine: Send {
    fn kind(&self) -> EngineKind;

    /// Run the solver against staged inputs and block until it finishes.
    fn run(&mut self, staged: &StagedInputs, options: &DoseOptions) -> Result<EngineRun>;
}

pub fn contains_error_marker(output: &str) -> bool {
    output.to_ascii_lowercase().contains(ERROR_MARKER)
}

/// A run succeeded when it exited cleanly and printed no error marker.
pub fn classify(output: &str, exited_ok: bool) -> bool {
    exited_ok && !contains_error_marker(output)
}

pub struct EngineHandle {
    kind: EngineKind,
    engine: Option<Box<dyn DoseEngine>>,
}

impl EngineHandle {
    pub fn none() -> Self {
        Self {
            kind: EngineKind::None,
            engine: None,
        }
    }

    pub fn from_engine(engine: Box<dyn DoseEngine>) -> Self {
        Self {
            kind: engine.kind(),
            engine: Some(engine),
        }
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_some()
    }

    pub fn run(&mut self, staged: &StagedInputs, options: &DoseOptions) -> Result<EngineRun> {
        let engine = self.engine.as_mut().ok_or(TomoError::EngineUnavailable)?;
        engine.run(staged, options)
    }
}

/// Local solver first, then the configured remote host.
pub fn discover(config: &EngineConfig) -> EngineHandle {
    if let Some(local) = LocalEngine::probe(config) {
        info!(gpu = local.has_gpu(), "using local dose engine");
        return EngineHandle::from_engine(Box::new(local));
    }
    if let Some(remote) = config.remote() {
        let timeout = Duration::from_secs(config.remote_timeout_secs);
        match RemoteEngine::connect(remote, timeout) {
            Ok(engine) => {
                info!(host = %remote.host, dir = engine.remote_dir(), "using remote dose engine");
                return EngineHandle::from_engine(Box::new(engine));
            }
            Err(e) => warn!(host = %remote.host, error = %e, "remote dose engine unavailable"),
        }
    }
    warn!("no dose engine found");
    EngineHandle::none()
}

/// Lazily discovered engine, kept for the life of the gateway.
pub struct EngineGateway {
    config: EngineConfig,
    handle: Option<EngineHandle>,
    discoveries: usize,
}

impl EngineGateway {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            handle: None,
            discoveries: 0,
        }
    }

    /// Gateway with an already chosen engine; discovery never runs.
    pub fn with_engine(config: EngineConfig, engine: Box<dyn DoseEngine>) -> Self {
        Self {
            config,
            handle: Some(EngineHandle::from_engine(engine)),
            discoveries: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of times discovery actually ran.
    pub fn discoveries(&self) -> usize {
        self.discoveries
    }

    pub fn discover(&mut self) -> &mut EngineHandle {
        if self.handle.is_none() {
            self.discoveries += 1;
            self.handle = Some(discover(&self.config));
        }
        self.handle.get_or_insert_with(EngineHandle::none)
    }

    /// Forget the current engine (closing any remote session) and probe again.
    pub fn rediscover(&mut self) -> &mut EngineHandle {
        self.handle = None;
        self.discover()
    }

    pub fn run(&mut self, staged: &StagedInputs, options: &DoseOptions) -> Result<EngineRun> {
        self.discover().run(staged, options)
    }
}
