//! Line-delimited artifact files (signed hex, txids).

use crate::error::ArtifactError;
use std::path::Path;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ArtifactError + '_ {
    move |source| ArtifactError::Io { path: path.display().to_string(), source }
}

pub fn write_lines(path: &Path, lines: &[String]) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error(path))?;
    }
    std::fs::write(path, lines.join("\n")).map_err(io_error(path))?;
    tracing::info!(path = %path.display(), lines = lines.len(), "Wrote artifact");
    Ok(())
}

/// Trimmed non-blank lines.
pub fn read_lines(path: &Path) -> Result<Vec<String>, ArtifactError> {
    let contents = std::fs::read_to_string(path).map_err(io_error(path))?;
    Ok(contents.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect())
}
