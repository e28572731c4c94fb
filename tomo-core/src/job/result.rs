use super::resample::upsample;
use crate::domain::{DoseVolume, ImageVolume};
use crate::error::{Result, TomoError};
use crate::stage::solver::dose_dimensions;
use crate::util::le::read_f32s;
use std::fs;
use std::path::Path;

/// Read the engine's f32 dose grid, checking it has `dims` voxels.
pub fn read_result(path: &Path, dims: [usize; 3]) -> Result<Vec<f32>> {
    let bytes = fs::read(path)?;
    let values = read_f32s(&bytes)?;
    let need: usize = dims.iter().product();
    if values.len() != need {
        return Err(TomoError::Format(format!(
            "{}: {} dose values, expected {need} for {dims:?}",
            path.display(),
            values.len()
        )));
    }
    Ok(values)
}

/// Native-resolution dose on the image's grid.
pub fn reconstruct(image: &ImageVolume, low: Vec<f32>, downsample: usize) -> Result<DoseVolume> {
    let [nx, ny, _] = image.dimensions;
    let data = upsample(low, dose_dimensions(image, downsample), [nx, ny], downsample)?;
    Ok(DoseVolume {
        data,
        start: image.start,
        width: image.width,
        dimensions: image.dimensions,
    })
}

pub fn load(path: &Path, image: &ImageVolume, downsample: usize) -> Result<DoseVolume> {
    let low = read_result(path, dose_dimensions(image, downsample))?;
    reconstruct(image, low, downsample)
}
