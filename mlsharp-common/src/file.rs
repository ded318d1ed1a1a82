//! File records and their generated artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An uploaded image and the artifacts generated from it.
///
/// Output paths start out absent and are filled in by completed jobs. Once
/// present they are never cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: String,
    pub original_name: String,
    pub original_path: String,
    pub gaussians_path: Option<String>,
    pub render_path: Option<String>,
    pub render_depth_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Output paths to merge into a [`FileRecord`]. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutputs {
    #[serde(default)]
    pub gaussians_path: Option<String>,
    #[serde(default)]
    pub render_path: Option<String>,
    #[serde(default)]
    pub render_depth_path: Option<String>,
}

impl FileOutputs {
    pub fn gaussians(path: impl Into<String>) -> Self {
        Self {
            gaussians_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn render(render_path: impl Into<String>, render_depth_path: impl Into<String>) -> Self {
        Self {
            render_path: Some(render_path.into()),
            render_depth_path: Some(render_depth_path.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.gaussians_path.is_none() && self.render_path.is_none() && self.render_depth_path.is_none()
    }
}
