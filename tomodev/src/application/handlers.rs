use std::fs;
use std::path::{Path, PathBuf};

use tomo_core::delivery::sinogram::decode_plan;
use tomo_core::error::{Result, TomoError};
use tomo_core::policy::MidpointPolicy;
use tomo_core::{
    DoseJobOrchestrator, DoseJobRequest, DoseOptions, DoseVolume, EngineConfig, EngineGateway,
    EventValue, ImageVolume, InputStager, PlanRecord, build,
};
use tracing::info;

use crate::presentation::cli::JobInputs;

pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(p) => EngineConfig::load(p),
        None => {
            let mut cfg = EngineConfig::default();
            cfg.apply_env();
            Ok(cfg)
        }
    }
}

fn json_err(path: &Path) -> impl FnOnce(serde_json::Error) -> TomoError + '_ {
    move |e| TomoError::Format(format!("{}: {e}", path.display()))
}

fn read_plan(path: &Path) -> Result<PlanRecord> {
    let text = fs::read_to_string(path)?;
    let mut plan: PlanRecord = serde_json::from_str(&text).map_err(json_err(path))?;
    if plan.sinogram_path.is_relative() {
        if let Some(dir) = path.parent() {
            plan.sinogram_path = dir.join(&plan.sinogram_path);
        }
    }
    Ok(plan)
}

fn read_image(header: &Path, voxels: &Path) -> Result<ImageVolume> {
    let text = fs::read_to_string(header)?;
    let mut image: ImageVolume = serde_json::from_str(&text).map_err(json_err(header))?;
    image.load_voxels(voxels)?;
    Ok(image)
}

pub fn handle_decode(
    config: &EngineConfig,
    plan: PathBuf,
    policy: Option<MidpointPolicy>,
    rows: bool,
) -> Result<()> {
    let plan = read_plan(&plan)?;
    let sino = decode_plan(&plan, policy.unwrap_or(config.midpoint_policy))?;
    let window = sino.window();
    println!(
        "plan={} projections={} leaves={:?} window={}..={} ({} active)",
        plan.uid,
        sino.projections(),
        sino.active_leaves(),
        window.start,
        window.stop,
        window.width()
    );
    if rows {
        for leaf in sino.active_leaves() {
            let row = sino.row(leaf);
            if row.iter().all(|&v| v == 0.0) {
                continue;
            }
            let cells: Vec<String> = row.iter().map(|v| format!("{v:.3}")).collect();
            println!("leaf {leaf:02}: {}", cells.join(" "));
        }
    }
    Ok(())
}

pub fn handle_timeline(plan: PathBuf) -> Result<()> {
    let plan = read_plan(&plan)?;
    let timeline = build(&plan.actions, plan.total_tau)?;
    for (i, ev) in timeline.iter().enumerate() {
        let value = match ev.value {
            EventValue::Value(v) => v.to_string(),
            EventValue::Unset => "-".to_string(),
        };
        println!("#{i:<4} tau={:<10} {:<13} {value}", ev.tau, ev.kind.as_str());
    }
    Ok(())
}

pub fn handle_stage(config: &EngineConfig, inputs: JobInputs, options: DoseOptions) -> Result<()> {
    let plan = read_plan(&inputs.plan)?;
    let image = read_image(&inputs.image, &inputs.voxels)?;
    let sinogram = decode_plan(&plan, config.midpoint_policy)?;
    let timeline = build(&plan.actions, plan.total_tau)?;

    let mut stager = InputStager::new(config);
    let staged = stager.stage(&DoseJobRequest {
        image: &image,
        plan: &plan,
        timeline: &timeline,
        sinogram: &sinogram,
        options: &options,
    })?;
    let dir = stager.keep().unwrap_or(staged.dir);
    println!("{}", dir.display());
    for name in &staged.written {
        println!("  {name}");
    }
    Ok(())
}

pub fn handle_discover(config: EngineConfig) -> Result<()> {
    let mut gateway = EngineGateway::new(config);
    let handle = gateway.discover();
    if !handle.is_available() {
        return Err(TomoError::EngineUnavailable);
    }
    println!("engine: {:?}", handle.kind());
    Ok(())
}

pub fn handle_calc(
    config: EngineConfig,
    inputs: JobInputs,
    options: DoseOptions,
    out: PathBuf,
) -> Result<()> {
    let plan = read_plan(&inputs.plan)?;
    let image = read_image(&inputs.image, &inputs.voxels)?;

    let mut jobs = DoseJobOrchestrator::new(config);
    let dose = jobs.submit_plan(&image, &plan, &options)?;
    dose.write_raw(&out)?;
    info!(out = %out.display(), "wrote dose grid");

    println!("{:#}", calc_summary(&plan.uid, &image.uid, &dose, &out));
    Ok(())
}

/// Grid geometry plus the peak and the dose at the middle voxel.
fn calc_summary(plan: &str, image: &str, dose: &DoseVolume, out: &Path) -> serde_json::Value {
    let [nx, ny, nz] = dose.dimensions;
    serde_json::json!({
        "plan": plan,
        "image": image,
        "dimensions": dose.dimensions,
        "start": dose.start,
        "width": dose.width,
        "max": dose.max(),
        "center": dose.get(nx / 2, ny / 2, nz / 2),
        "out": out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_sinogram_path_follows_plan_file() {
        let dir = tempfile::tempdir().unwrap();
        let plan_path = dir.path().join("plan.json");
        fs::write(
            &plan_path,
            r#"{
                "uid": "p",
                "scale": 1.0,
                "total_tau": 2.0,
                "lower_leaf_index": 0,
                "number_of_projections": 2,
                "number_of_leaves": 1,
                "actions": {},
                "sinogram_path": "sino.bin"
            }"#,
        )
        .unwrap();
        let plan = read_plan(&plan_path).unwrap();
        assert_eq!(plan.sinogram_path, dir.path().join("sino.bin"));
    }

    #[test]
    fn malformed_plan_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let plan_path = dir.path().join("plan.json");
        fs::write(&plan_path, "{ not json").unwrap();
        assert!(matches!(read_plan(&plan_path), Err(TomoError::Format(_))));
    }

    #[test]
    fn image_voxels_are_loaded_from_raw_file() {
        let dir = tempfile::tempdir().unwrap();
        let header = dir.path().join("image.json");
        fs::write(
            &header,
            r#"{
                "uid": "i",
                "start": [0.0, 0.0, 0.0],
                "width": [1.0, 1.0, 1.0],
                "dimensions": [2, 1, 1],
                "calibration": { "ct_numbers": [0.0], "densities": [0.0] }
            }"#,
        )
        .unwrap();
        let raw = dir.path().join("image.raw");
        fs::write(&raw, [1u8, 0, 2, 0]).unwrap();
        let image = read_image(&header, &raw).unwrap();
        assert_eq!(image.voxels, vec![1, 2]);
    }

    #[test]
    fn summary_reports_middle_voxel() {
        let dose = DoseVolume {
            data: (0..8).map(|v| v as f32).collect(),
            start: [0.0; 3],
            width: [1.0; 3],
            dimensions: [2, 2, 2],
        };
        let summary = calc_summary("p", "i", &dose, Path::new("dose.raw"));
        assert_eq!(summary["center"], 7.0);
        assert_eq!(summary["max"], 7.0);
        assert_eq!(summary["dimensions"], serde_json::json!([2, 2, 2]));
    }
}
