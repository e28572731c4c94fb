use crate::error::{Result, TomoError};

/// Expand a downsampled dose grid back to native transverse resolution.
///
/// Each low-resolution cell fills a `downsample x downsample` block of the
/// output slice. Native rows/columns beyond the last full block (when the
/// native size is not a multiple of `downsample`) repeat the outermost block.
/// Slices (z) are never resampled.
pub fn upsample(
    low: Vec<f32>,
    low_dims: [usize; 3],
    native: [usize; 2],
    downsample: usize,
) -> Result<Vec<f32>> {
    let [lx, ly, nz] = low_dims;
    if low.len() != lx * ly * nz {
        return Err(TomoError::Format(format!(
            "dose grid holds {} values, expected {lx}x{ly}x{nz}",
            low.len()
        )));
    }
    if downsample == 1 {
        return Ok(low);
    }
    if lx == 0 || ly == 0 {
        return Err(TomoError::Format("empty dose grid".into()));
    }

    let [nx, ny] = native;
    let mut out = Vec::with_capacity(nx * ny * nz);
    for z in 0..nz {
        let slice = &low[z * lx * ly..(z + 1) * lx * ly];
        for y in 0..ny {
            let row = &slice[(y / downsample).min(ly - 1) * lx..][..lx];
            out.extend((0..nx).map(|x| row[(x / downsample).min(lx - 1)]));
        }
    }
    Ok(out)
}
