use crate::analysis::checksum::compute_checksum;
use crate::error::{ShadowError, ShadowResult};
use crate::models::snapshot::{Bundle, ExportDocument};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A fully written, fsynced temp file waiting to replace `final_path`.
/// Dropping it without `commit` removes the temp file and leaves the
/// current export untouched.
pub struct StagedExport {
    temp_path: PathBuf,
    final_path: PathBuf,
    committed: bool,
}

impl StagedExport {
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn commit(mut self) -> ShadowResult<()> {
        fs::rename(&self.temp_path, &self.final_path)?;
        self.committed = true;
        if let Some(parent) = self.final_path.parent() {
            // Persist the rename itself; not every platform can open a directory.
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }
}

impl Drop for StagedExport {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

pub fn stage_export(path: &Path, doc: &ExportDocument) -> ShadowResult<StagedExport> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "export.json".to_string());
    let temp_path = parent.join(format!(".{file_name}.tmp.{}", Uuid::new_v4()));

    let staged = StagedExport {
        temp_path,
        final_path: path.to_path_buf(),
        committed: false,
    };

    let body = serde_json::to_vec_pretty(doc)?;
    {
        let mut file = File::create(&staged.temp_path)?;
        file.write_all(&body)?;
        // Data must be durable before the rename makes it visible.
        file.sync_all()?;
    }

    Ok(staged)
}

pub fn export_latest(path: &Path, bundle: &Bundle, checksum: &str) -> ShadowResult<()> {
    let doc = ExportDocument {
        collections: bundle.collections.clone(),
        meta: bundle.meta.clone(),
        checksum: checksum.to_string(),
    };
    stage_export(path, &doc)?.commit()?;
    log::info!(
        "export written: path={} items={} checksum={}",
        path.display(),
        bundle.item_count(),
        checksum
    );
    Ok(())
}

/// Reads an export file back, refusing it if the recorded checksum does
/// not match the collections.
pub fn read_export(path: &Path) -> ShadowResult<ExportDocument> {
    let raw = fs::read_to_string(path)?;
    let doc: ExportDocument = serde_json::from_str(&raw)?;
    let computed = compute_checksum(&doc.collections);
    if computed != doc.checksum {
        return Err(ShadowError::ChecksumMismatch {
            source_label: path.display().to_string(),
            recorded: doc.checksum,
            computed,
        });
    }
    Ok(doc)
}
