//! External collaborators that do the actual model work.
//!
//! The job layer only sees the [`Predictor`] and [`Renderer`] traits. Both are
//! synchronous: implementations block the worker thread they are called on.
//! The command-backed implementations shell out to the model CLI.

mod command;

pub use command::{CommandPredictor, CommandRenderer};

use std::path::PathBuf;

use mlsharp_common::RenderParams;

/// Errors from a predictor or renderer.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    #[error("Input not found: {0}")]
    InputMissing(String),

    #[error("Failed to launch {program}: {message}")]
    Launch { program: String, message: String },

    #[error("{program} exited with {status}: {stderr}")]
    Exited {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Expected output was not written: {0}")]
    OutputMissing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Compute device requested for a predict job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    /// Let the model pick the best available device.
    Auto,
    Cpu,
    Cuda,
    Mps,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Auto => "auto",
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
            Device::Mps => "mps",
        }
    }

    /// Resolve a per-job request against the configured default.
    /// Matching is case-insensitive and `default` is an alias for `auto`.
    pub fn resolve(requested: Option<&str>, default: &str) -> Result<Self, ServiceError> {
        let value = requested.unwrap_or(default).trim().to_ascii_lowercase();
        match value.as_str() {
            "auto" | "default" => Ok(Device::Auto),
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda),
            "mps" => Ok(Device::Mps),
            _ => Err(ServiceError::UnsupportedDevice(value)),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct PredictInput {
    pub file_id: String,
    pub input_path: PathBuf,
    /// Unresolved device request; `None` uses the predictor's default.
    pub device: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PredictOutput {
    pub gaussians_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RenderInput {
    pub file_id: String,
    pub gaussians_path: PathBuf,
    pub params: RenderParams,
}

#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub render_path: PathBuf,
    pub render_depth_path: PathBuf,
}

/// Turns an image into a gaussians file.
pub trait Predictor: Send + Sync {
    fn predict(&self, input: &PredictInput) -> Result<PredictOutput, ServiceError>;
}

/// Turns a gaussians file into a video and a depth video. Needs a GPU.
pub trait Renderer: Send + Sync {
    fn render(&self, input: &RenderInput) -> Result<RenderOutput, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_resolution() {
        assert_eq!(Device::resolve(None, "auto").unwrap(), Device::Auto);
        assert_eq!(Device::resolve(Some("CUDA"), "auto").unwrap(), Device::Cuda);
        assert_eq!(Device::resolve(None, "mps").unwrap(), Device::Mps);
        assert_eq!(Device::resolve(Some("default"), "cpu").unwrap(), Device::Auto);
    }

    #[test]
    fn test_unknown_device_rejected() {
        let err = Device::resolve(Some("tpu"), "auto").unwrap_err();
        assert_eq!(err.to_string(), "Unsupported device: tpu");
    }
}
