//! Run directories and weight checkpoints.

use anyhow::Context;
use candle_nn::VarMap;
use std::path::{Path, PathBuf};

/// `<output_dir>/<run_name>/` and its `checkpoints/` subdirectory.
#[derive(Debug, Clone)]
pub struct RunDirs {
    pub root: PathBuf,
    pub checkpoints: PathBuf,
}

impl RunDirs {
    pub fn create(output_dir: &Path, run_name: &str) -> anyhow::Result<Self> {
        let root = output_dir.join(run_name);
        let checkpoints = root.join("checkpoints");
        std::fs::create_dir_all(&checkpoints)
            .with_context(|| format!("Failed to create {}", checkpoints.display()))?;
        Ok(Self { root, checkpoints })
    }

    pub fn best_weights(&self) -> PathBuf {
        self.root.join("best.safetensors")
    }
}

/// `{run_name}-{epoch:04}-{val_loss:.5}.safetensors`
pub fn checkpoint_file_name(run_name: &str, epoch: usize, val_loss: f64) -> String {
    format!("{run_name}-{epoch:04}-{val_loss:.5}.safetensors")
}

/// Save every variable in `varmap` to `path`.
pub fn save_weights(varmap: &VarMap, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    varmap
        .save(path)
        .map_err(|e| anyhow::anyhow!("Failed to save weights to {}: {e}", path.display()))?;
    tracing::debug!(path = %path.display(), "Saved weights");
    Ok(())
}

/// Overwrite the variables of `varmap` with the tensors stored at `path`.
pub fn load_weights(varmap: &mut VarMap, path: &Path) -> anyhow::Result<()> {
    varmap
        .load(path)
        .map_err(|e| anyhow::anyhow!("Failed to load weights from {}: {e}", path.display()))?;
    tracing::info!(path = %path.display(), "Loaded initial weights");
    Ok(())
}

/// Total number of scalar parameters held by `varmap`.
pub fn parameter_count(varmap: &VarMap) -> usize {
    varmap.all_vars().iter().map(|v| v.elem_count()).sum()
}
