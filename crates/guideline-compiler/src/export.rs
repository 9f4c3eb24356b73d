//! Writing and reading persisted schemas.
//!
//! Schemas are stored as pretty-printed JSON. Every write returns an
//! [`ExportReceipt`] with the SHA-256 of the bytes written, so callers can
//! record which schema version a decision was made with.

use std::fs;
use std::path::{Path, PathBuf};

use guideline_criteria::{render_summary, GuidelineSchema};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{CompilerError, CompilerResult};

/// Record of a file written by this module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReceipt {
    /// File that was written.
    pub path: PathBuf,
    /// Number of bytes written.
    pub bytes: u64,
    /// Hex SHA-256 of the file contents.
    pub sha256: String,
}

/// Hex SHA-256 of `data`.
pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn write_file(path: &Path, contents: &[u8]) -> CompilerResult<ExportReceipt> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CompilerError::io_error(parent, e))?;
    }
    fs::write(path, contents).map_err(|e| CompilerError::io_error(path, e))?;
    Ok(ExportReceipt {
        path: path.to_path_buf(),
        bytes: contents.len() as u64,
        sha256: sha256_hex(contents),
    })
}

/// Writes a schema as pretty-printed JSON.
///
/// # Example
///
/// ```rust,no_run
/// use guideline_compiler::{export_schema, load_schema};
/// use guideline_criteria::{GuidelineMetadata, GuidelineSchema};
///
/// let schema = GuidelineSchema::new(GuidelineMetadata::from_name("Sepsis"), Vec::new(), 1);
/// let receipt = export_schema(&schema, "out/sepsis.json")?;
/// println!("wrote {} bytes, sha256 {}", receipt.bytes, receipt.sha256);
///
/// let loaded = load_schema(&receipt.path)?;
/// assert_eq!(loaded, schema);
/// # Ok::<(), guideline_compiler::CompilerError>(())
/// ```
pub fn export_schema<P: AsRef<Path>>(schema: &GuidelineSchema, path: P) -> CompilerResult<ExportReceipt> {
    let path = path.as_ref();
    let json = serde_json::to_vec_pretty(schema)
        .map_err(|e| CompilerError::Serialization(e.to_string()))?;
    let receipt = write_file(path, &json)?;
    info!(
        path = %path.display(),
        bytes = receipt.bytes,
        criteria = schema.criteria().len(),
        "exported schema"
    );
    Ok(receipt)
}

/// Reads a schema written by [`export_schema`].
///
/// The schema is not validated here.
pub fn load_schema<P: AsRef<Path>>(path: P) -> CompilerResult<GuidelineSchema> {
    let path = path.as_ref();
    let json = fs::read_to_string(path).map_err(|e| CompilerError::io_error(path, e))?;
    serde_json::from_str(&json).map_err(|e| CompilerError::Serialization(e.to_string()))
}

/// Writes the human-readable summary of a schema.
pub fn export_summary<P: AsRef<Path>>(schema: &GuidelineSchema, path: P) -> CompilerResult<ExportReceipt> {
    let path = path.as_ref();
    let receipt = write_file(path, render_summary(schema).as_bytes())?;
    info!(path = %path.display(), bytes = receipt.bytes, "exported summary");
    Ok(receipt)
}
