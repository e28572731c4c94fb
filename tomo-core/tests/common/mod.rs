#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tomo_core::EngineConfig;
use tomo_core::config::DEFAULT_MODEL_FILES;
use tomo_core::delivery::timeline::{RawActions, SyncAction, UnsyncAction};
use tomo_core::domain::{DensityCurve, ImageVolume, PlanRecord};

pub fn write_f64s(path: &Path, values: &[f64]) {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    fs::write(path, bytes).unwrap();
}

pub fn read_f64s(path: &Path) -> Vec<f64> {
    fs::read(path)
        .unwrap()
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

/// 2 active leaves (30, 31) over 3 projections, projection-major.
pub fn write_blob(path: &Path) {
    write_f64s(
        path,
        &[
            0.25, 0.75, 0.5, 0.5, // p1: leaf 30 open 0.5
            1.0, 2.0, 1.5, 1.5, // p2: leaf 30 open 1.0
            2.5, 2.5, 2.1, 2.9, // p3: leaf 31 open 0.8
        ],
    );
}

pub fn image() -> ImageVolume {
    ImageVolume {
        uid: "img-1".into(),
        start: [-1.5, -1.5, 0.0],
        width: [1.0, 1.0, 1.0],
        dimensions: [4, 4, 2],
        calibration: DensityCurve {
            ct_numbers: vec![0.0, 1024.0, 3000.0],
            densities: vec![0.0, 1.0, 2.5],
        },
        registration: Default::default(),
        voxels: (0..32).collect(),
    }
}

pub fn plan(blob: PathBuf) -> PlanRecord {
    PlanRecord {
        uid: "plan-1".into(),
        scale: 0.5,
        total_tau: Some(3.0),
        lower_leaf_index: 30,
        number_of_projections: 3,
        number_of_leaves: 2,
        actions: RawActions {
            unsynchronized: vec![
                UnsyncAction::GantryPosition { angle: 10.0 },
                UnsyncAction::IsocenterPosition {
                    x: 5.0,
                    y: 0.0,
                    z: 2.0,
                },
            ],
            synchronized: vec![
                SyncAction::GantryVelocity {
                    tau: 0.0,
                    rate: 6.0,
                },
                SyncAction::JawVelocity {
                    tau: 1.0,
                    front: 0.5,
                    back: 0.5,
                },
            ],
        },
        sinogram_path: blob,
    }
}

pub fn model_dir(root: &Path) -> PathBuf {
    let dir = root.join("model");
    fs::create_dir_all(&dir).unwrap();
    for name in DEFAULT_MODEL_FILES {
        fs::write(dir.join(name), format!("model {name}")).unwrap();
    }
    dir
}

/// Config rooted in `root` with no engine on the search path.
pub fn config(root: &Path) -> EngineConfig {
    let bin = root.join("bin");
    fs::create_dir_all(&bin).unwrap();
    EngineConfig {
        search_path: Some(vec![bin]),
        model_dir: model_dir(root),
        staging_root: Some(root.join("staging")),
        ..Default::default()
    }
}

#[cfg(unix)]
pub fn install_engine(root: &Path, name: &str, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    let p = root.join("bin").join(name);
    fs::create_dir_all(p.parent().unwrap()).unwrap();
    fs::write(&p, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&p, fs::Permissions::from_mode(0o755)).unwrap();
}
