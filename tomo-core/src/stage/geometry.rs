use super::KeyValues;
use crate::domain::ImageVolume;
use crate::util::le::write_u16s;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// `ct.header`: calibration curve and grid geometry, corner-based.
pub fn write_header(image: &ImageVolume, path: &Path) -> io::Result<()> {
    let corner = image.corner();
    let [_, _, nz] = image.dimensions;
    let slices: Vec<f64> = (0..=nz)
        .map(|k| corner[2] + k as f64 * image.width[2])
        .collect();

    let mut kv = KeyValues::new();
    kv.list("calibration.ctnums", &image.calibration.ct_numbers);
    kv.list("calibration.densities", &image.calibration.densities);
    kv.list("cs.dimensions", &image.dimensions);
    kv.list("cs.slicepositions", &slices);
    kv.list("cs.start", &corner);
    kv.list("cs.width", &image.width);
    kv.write(path)
}

/// `ct.img`: voxels verbatim as little-endian u16.
pub fn write_voxels(image: &ImageVolume, path: &Path) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    write_u16s(&mut w, &image.voxels)?;
    w.flush()
}
