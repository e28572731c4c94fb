use super::{CT_HEADER, CT_IMAGE, KeyValues, PLAN_HEADER, PLAN_IMAGE, RESULT};
use crate::domain::ImageVolume;
use crate::job::orchestrator::DoseOptions;
use std::io;
use std::path::Path;

/// Dose grid dimensions for a downsample factor; z is never downsampled.
pub fn dose_dimensions(image: &ImageVolume, downsample: usize) -> [usize; 3] {
    let [nx, ny, nz] = image.dimensions;
    [nx / downsample, ny / downsample, nz]
}

/// `dose.cfg`: output grid and the speed/quality knobs.
pub fn write_config(image: &ImageVolume, options: &DoseOptions, path: &Path) -> io::Result<()> {
    let d = options.downsample;
    let corner = image.corner();
    let start = [
        corner[0] + d as f64 * image.width[0] / 2.0,
        corner[1] + d as f64 * image.width[1] / 2.0,
        image.start[2],
    ];
    let width = [
        image.width[0] * d as f64,
        image.width[1] * d as f64,
        image.width[2],
    ];

    let mut kv = KeyValues::new();
    kv.set("outlevel", 0);
    kv.set("calcdose", 1);
    kv.set("calcsino", 0);
    kv.set("ctheader", CT_HEADER);
    kv.set("ctimage", CT_IMAGE);
    kv.set("plan", PLAN_HEADER);
    kv.set("planimage", PLAN_IMAGE);
    kv.set("dosefile", RESULT);
    kv.list("dose.dimensions", &dose_dimensions(image, d));
    kv.list("dose.start", &start);
    kv.list("dose.width", &width);
    kv.set("azimuths", options.azimuths);
    kv.set("raysteps", options.ray_steps);
    kv.set("supersample", u8::from(options.super_sample));
    kv.write(path)
}
