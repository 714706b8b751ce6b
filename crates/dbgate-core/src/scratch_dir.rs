use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Creates the scratch directory or removes the top-level files left in it by a
/// previous process. Subdirectories are left untouched.
pub fn reset_scratch_dir(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        bail!("scratch directory path cannot be empty");
    }
    if path.exists() && !path.is_dir() {
        bail!("scratch path '{}' is not a directory", path.display());
    }
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        return Ok(path.to_path_buf());
    }

    let mut removed = 0_usize;
    for entry in
        std::fs::read_dir(path).with_context(|| format!("failed to read {}", path.display()))?
    {
        let entry = entry.with_context(|| format!("failed to read entry in {}", path.display()))?;
        let entry_path = entry.path();
        if entry_path.is_file() {
            std::fs::remove_file(&entry_path)
                .with_context(|| format!("failed to remove {}", entry_path.display()))?;
            removed = removed.saturating_add(1);
        }
    }
    tracing::info!(path = %path.display(), removed, "scratch directory reset");
    Ok(path.to_path_buf())
}
