pub mod delivery;
pub mod geometry;
pub mod model;
pub mod solver;

use crate::config::EngineConfig;
use crate::error::{Result, TomoError};
use crate::job::orchestrator::{DoseJobRequest, DoseOptions};
use std::fmt::{Display, Write as _};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

pub const CT_HEADER: &str = "ct.header";
pub const CT_IMAGE: &str = "ct.img";
pub const SOLVER_CONFIG: &str = "dose.cfg";
pub const PLAN_HEADER: &str = "plan.header";
pub const PLAN_IMAGE: &str = "plan.img";
pub const RESULT: &str = "dose.img";
pub const LOG: &str = "log.txt";

/// Line-oriented `key=value` text; list values are space separated.
pub(crate) struct KeyValues {
    buf: String,
}

impl KeyValues {
    pub(crate) fn new() -> Self {
        Self { buf: String::new() }
    }

    pub(crate) fn set(&mut self, key: &str, value: impl Display) {
        let _ = writeln!(self.buf, "{key}={value}");
    }

    pub(crate) fn list<T: Display>(&mut self, key: &str, values: &[T]) {
        let joined: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        self.set(key, joined.join(" "));
    }

    pub(crate) fn into_string(self) -> String {
        self.buf
    }

    pub(crate) fn write(self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.buf)
    }
}

/// Where a job's inputs ended up and which files this call (re)wrote.
#[derive(Clone, Debug)]
pub struct StagedInputs {
    pub dir: PathBuf,
    pub written: Vec<String>,
    /// True when the staging directory was created by this call.
    pub fresh: bool,
}

impl StagedInputs {
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn config(&self) -> PathBuf {
        self.path(SOLVER_CONFIG)
    }

    pub fn result(&self) -> PathBuf {
        self.path(RESULT)
    }

    pub fn log(&self) -> PathBuf {
        self.path(LOG)
    }
}

/// Writes engine inputs into one staging directory that lives as long as
/// the stager, rewriting only what changed since the previous job.
pub struct InputStager {
    model_dir: PathBuf,
    model_files: Vec<String>,
    staging_root: Option<PathBuf>,
    dir: Option<TempDir>,
    models_copied: bool,
    image_fingerprint: Option<[u8; 32]>,
    options: Option<DoseOptions>,
}

fn staging_err(path: &Path) -> impl FnOnce(io::Error) -> TomoError + '_ {
    move |e| TomoError::Staging(format!("{}: {e}", path.display()))
}

impl InputStager {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            model_dir: config.model_dir.clone(),
            model_files: config.model_files.clone(),
            staging_root: config.staging_root.clone(),
            dir: None,
            models_copied: false,
            image_fingerprint: None,
            options: None,
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(|d| d.path())
    }

    /// Drop the staging directory; the next job stages from scratch.
    pub fn reset(&mut self) {
        self.dir = None;
        self.models_copied = false;
        self.image_fingerprint = None;
        self.options = None;
    }

    /// Detach the staging directory so it survives the stager.
    pub fn keep(&mut self) -> Option<PathBuf> {
        let dir = self.dir.take()?.keep();
        self.reset();
        Some(dir)
    }

    /// Checks that must pass before anything touches the filesystem.
    pub fn validate(request: &DoseJobRequest<'_>) -> Result<()> {
        request.image.registration.validate()?;

        let d = request.options.downsample;
        let nx = request.image.dimensions[0];
        if d == 0 || nx % d != 0 {
            return Err(TomoError::InvalidDownsample {
                dimension: nx,
                downsample: d,
            });
        }
        if request.image.dimensions[1] < d {
            return Err(TomoError::Validation(format!(
                "downsample {d} leaves no rows in y dimension {}",
                request.image.dimensions[1]
            )));
        }
        if request.image.voxels.len() != request.image.voxel_count() {
            return Err(TomoError::Validation(format!(
                "image {} has {} voxels for dimensions {:?}",
                request.image.uid,
                request.image.voxels.len(),
                request.image.dimensions
            )));
        }
        let sino = request.sinogram;
        if sino.projections() != request.plan.number_of_projections
            || sino.active_leaves() != request.plan.active_leaves()
        {
            return Err(TomoError::Validation(format!(
                "sinogram ({} projections, leaves {:?}) does not match plan {}",
                sino.projections(),
                sino.active_leaves(),
                request.plan.uid
            )));
        }
        Ok(())
    }

    fn ensure_dir(&mut self) -> Result<(PathBuf, bool)> {
        if let Some(d) = &self.dir {
            return Ok((d.path().to_path_buf(), false));
        }
        let mut builder = tempfile::Builder::new();
        builder.prefix("tomo_");
        let dir = match &self.staging_root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(staging_err(root))?;
                builder.tempdir_in(root).map_err(staging_err(root))?
            }
            None => builder
                .tempdir()
                .map_err(|e| TomoError::Staging(format!("temp dir: {e}")))?,
        };
        let path = dir.path().to_path_buf();
        info!(dir = %path.display(), "created staging directory");
        self.dir = Some(dir);
        Ok((path, true))
    }

    pub fn stage(&mut self, request: &DoseJobRequest<'_>) -> Result<StagedInputs> {
        Self::validate(request)?;
        let (dir, fresh) = self.ensure_dir()?;
        let mut written = Vec::new();

        if !self.models_copied {
            let names = model::copy_model(&self.model_dir, &self.model_files, &dir)?;
            written.extend(names);
            self.models_copied = true;
        }

        let image = request.image;
        let fingerprint = image.fingerprint();
        let image_changed = self.image_fingerprint != Some(fingerprint);
        if image_changed {
            let p = dir.join(CT_HEADER);
            geometry::write_header(image, &p).map_err(staging_err(&p))?;
            let p = dir.join(CT_IMAGE);
            geometry::write_voxels(image, &p).map_err(staging_err(&p))?;
            written.push(CT_HEADER.to_string());
            written.push(CT_IMAGE.to_string());
            self.image_fingerprint = Some(fingerprint);
        }

        if image_changed || self.options.as_ref() != Some(request.options) {
            let p = dir.join(SOLVER_CONFIG);
            solver::write_config(image, request.options, &p).map_err(staging_err(&p))?;
            written.push(SOLVER_CONFIG.to_string());
            self.options = Some(request.options.clone());
        }

        let p = dir.join(PLAN_HEADER);
        delivery::write_header(
            request.plan,
            request.timeline,
            request.sinogram,
            &image.registration,
            &p,
        )
        .map_err(staging_err(&p))?;
        let p = dir.join(PLAN_IMAGE);
        delivery::write_stream(request.sinogram, &p).map_err(staging_err(&p))?;
        written.push(PLAN_HEADER.to_string());
        written.push(PLAN_IMAGE.to_string());

        debug!(dir = %dir.display(), files = ?written, "staged engine inputs");
        Ok(StagedInputs {
            dir,
            written,
            fresh,
        })
    }
}
