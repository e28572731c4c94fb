use crate::error::{Result, TomoError};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Copy beam model files into `dest`, returning the names copied.
///
/// An empty `files` list copies every regular file at the top of `model_dir`.
pub fn copy_model(model_dir: &Path, files: &[String], dest: &Path) -> Result<Vec<String>> {
    let names: Vec<String> = if files.is_empty() {
        let mut v = Vec::new();
        for e in WalkDir::new(model_dir).min_depth(1).max_depth(1) {
            let e = e.map_err(|e| {
                TomoError::Staging(format!("model dir {}: {e}", model_dir.display()))
            })?;
            if e.file_type().is_file() {
                v.push(e.file_name().to_string_lossy().to_string());
            }
        }
        v.sort();
        v
    } else {
        files.to_vec()
    };

    for name in &names {
        let src = model_dir.join(name);
        fs::copy(&src, dest.join(name)).map_err(|e| {
            TomoError::Staging(format!("copy model file {}: {e}", src.display()))
        })?;
    }
    Ok(names)
}
