//! On-disk layout for uploaded images and generated artifacts.
//!
//! Everything for one file lives under `<data_dir>/files/<file_id>/`:
//! `original<ext>`, `gaussians.ply`, `render.mp4` and `render.depth.mp4`.

use std::path::{Path, PathBuf};

/// Extension used when an upload's name carries none.
const FALLBACK_EXTENSION: &str = ".bin";

#[derive(Debug, Clone)]
pub struct Storage {
    data_dir: PathBuf,
}

impl Storage {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn file_root(&self, file_id: &str) -> PathBuf {
        self.data_dir.join("files").join(file_id)
    }

    /// `ext` includes the leading dot.
    pub fn original_path(&self, file_id: &str, ext: &str) -> PathBuf {
        self.file_root(file_id).join(format!("original{}", ext))
    }

    pub fn gaussians_path(&self, file_id: &str) -> PathBuf {
        self.file_root(file_id).join("gaussians.ply")
    }

    pub fn render_path(&self, file_id: &str) -> PathBuf {
        self.file_root(file_id).join("render.mp4")
    }

    pub fn render_depth_path(&self, file_id: &str) -> PathBuf {
        self.file_root(file_id).join("render.depth.mp4")
    }

    /// Create the directory for `file_id` if needed and return it.
    pub fn ensure_file_dir(&self, file_id: &str) -> std::io::Result<PathBuf> {
        let root = self.file_root(file_id);
        std::fs::create_dir_all(&root)?;
        Ok(root)
    }

    /// Write an uploaded image as `original<ext>`, keeping the extension of
    /// `filename`.
    pub fn persist_upload(
        &self,
        file_id: &str,
        filename: &str,
        content: &[u8],
    ) -> std::io::Result<PathBuf> {
        self.ensure_file_dir(file_id)?;
        let target = self.original_path(file_id, &upload_extension(filename));
        std::fs::write(&target, content)?;
        tracing::debug!(file_id, path = %target.display(), bytes = content.len(), "Persisted upload");
        Ok(target)
    }
}

fn upload_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}
