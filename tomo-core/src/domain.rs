// tomo_core/src/domain.rs
use crate::delivery::timeline::RawActions;
use crate::error::{Result, TomoError};
use crate::util::le::{read_u16s, write_f32s};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Physical positions in the leaf bank; sinogram rows are always this many.
pub const LEAF_BANK: usize = 64;

/// Rigid 6-DOF offset between planning and daily image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationCorrection {
    pub pitch: f64,
    pub yaw: f64,
    /// Degrees, folded into every gantryAngle event.
    pub roll: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl RegistrationCorrection {
    pub fn validate(&self) -> Result<()> {
        if self.pitch != 0.0 || self.yaw != 0.0 {
            return Err(TomoError::UnsupportedRegistration {
                pitch: self.pitch,
                yaw: self.yaw,
            });
        }
        Ok(())
    }
}

/// Image value to physical density lookup table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DensityCurve {
    pub ct_numbers: Vec<f64>,
    pub densities: Vec<f64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ImageVolume {
    pub uid: String,
    /// Center of the first voxel, archive convention.
    pub start: [f64; 3],
    pub width: [f64; 3],
    pub dimensions: [usize; 3],
    pub calibration: DensityCurve,
    #[serde(default)]
    pub registration: RegistrationCorrection,
    /// x fastest, then y, then z.
    #[serde(skip)]
    pub voxels: Vec<u16>,
}

impl ImageVolume {
    pub fn voxel_count(&self) -> usize {
        self.dimensions.iter().product()
    }

    /// Physical coordinate of the outer corner of the first voxel.
    pub fn corner(&self) -> [f64; 3] {
        [
            self.start[0] - self.width[0] / 2.0,
            self.start[1] - self.width[1] / 2.0,
            self.start[2] - self.width[2] / 2.0,
        ]
    }

    /// Read the raw u16 voxel grid that accompanies a geometry header.
    pub fn load_voxels(&mut self, raw: &Path) -> Result<()> {
        let bytes = fs::read(raw)?;
        let voxels = read_u16s(&bytes)?;
        if voxels.len() != self.voxel_count() {
            return Err(TomoError::Format(format!(
                "{}: {} voxels, expected {}",
                raw.display(),
                voxels.len(),
                self.voxel_count()
            )));
        }
        self.voxels = voxels;
        Ok(())
    }

    /// Content hash over geometry, calibration and voxels.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut h = blake3::Hasher::new();
        for d in self.dimensions {
            h.update(&(d as u64).to_le_bytes());
        }
        for v in self.start.iter().chain(self.width.iter()) {
            h.update(&v.to_le_bytes());
        }
        for v in self
            .calibration
            .ct_numbers
            .iter()
            .chain(self.calibration.densities.iter())
        {
            h.update(&v.to_le_bytes());
        }
        for v in &self.voxels {
            h.update(&v.to_le_bytes());
        }
        *h.finalize().as_bytes()
    }
}

/// Delivery plan fields already extracted from the archive.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlanRecord {
    pub uid: String,
    pub scale: f64,
    #[serde(default)]
    pub total_tau: Option<f64>,
    /// Zero-based bank position of the first active leaf.
    pub lower_leaf_index: usize,
    pub number_of_projections: usize,
    pub number_of_leaves: usize,
    #[serde(default)]
    pub actions: RawActions,
    pub sinogram_path: PathBuf,
}

impl PlanRecord {
    /// Bank positions covered by the declared active leaves.
    pub fn active_leaves(&self) -> std::ops::Range<usize> {
        self.lower_leaf_index..self.lower_leaf_index + self.number_of_leaves
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DoseVolume {
    pub data: Vec<f32>,
    pub start: [f64; 3],
    pub width: [f64; 3],
    pub dimensions: [usize; 3],
}

impl DoseVolume {
    pub fn get(&self, x: usize, y: usize, z: usize) -> f32 {
        let [nx, ny, _] = self.dimensions;
        self.data[x + nx * (y + ny * z)]
    }

    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(0.0, f32::max)
    }

    pub fn write_raw(&self, out: &Path) -> Result<()> {
        let mut w = BufWriter::new(File::create(out)?);
        write_f32s(&mut w, &self.data)?;
        w.flush()?;
        Ok(())
    }
}
