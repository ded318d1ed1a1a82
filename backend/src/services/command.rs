//! Predictor and renderer backed by an external model CLI.
//!
//! The configured program is invoked once per job with the wrapper `args`
//! first, followed by the job flags:
//!
//! ```text
//! <program> <args..> --input <image> --output <gaussians.ply> --device <device> [--checkpoint <model>]
//! <program> <args..> --input <gaussians.ply> --output <render.mp4> --depth-output <render.depth.mp4> [trajectory flags]
//! ```

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;

use mlsharp_common::RenderParams;

use super::{
    Device, PredictInput, PredictOutput, Predictor, RenderInput, RenderOutput, Renderer,
    ServiceError,
};
use crate::config::{PredictorConfig, RendererConfig};
use crate::storage::Storage;

/// Lines of stderr kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

pub struct CommandPredictor {
    config: PredictorConfig,
    storage: Storage,
}

impl CommandPredictor {
    pub fn new(config: PredictorConfig, storage: Storage) -> Self {
        Self { config, storage }
    }
}

impl Predictor for CommandPredictor {
    fn predict(&self, input: &PredictInput) -> Result<PredictOutput, ServiceError> {
        let device = Device::resolve(input.device.as_deref(), &self.config.device_default)?;
        require_input(&input.input_path)?;

        self.storage.ensure_file_dir(&input.file_id)?;
        let gaussians_path = self.storage.gaussians_path(&input.file_id);
        remove_stale(&gaussians_path)?;

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg("--input")
            .arg(&input.input_path)
            .arg("--output")
            .arg(&gaussians_path)
            .arg("--device")
            .arg(device.as_str());
        if let Some(model_path) = &self.config.model_path {
            cmd.arg("--checkpoint").arg(model_path);
        }

        tracing::info!(file_id = %input.file_id, %device, "Running predictor");
        run(&self.config.program, cmd)?;
        require_output(&gaussians_path)?;

        Ok(PredictOutput { gaussians_path })
    }
}

pub struct CommandRenderer {
    config: RendererConfig,
    storage: Storage,
}

impl CommandRenderer {
    pub fn new(config: RendererConfig, storage: Storage) -> Self {
        Self { config, storage }
    }
}

impl Renderer for CommandRenderer {
    fn render(&self, input: &RenderInput) -> Result<RenderOutput, ServiceError> {
        require_input(&input.gaussians_path)?;

        self.storage.ensure_file_dir(&input.file_id)?;
        let render_path = self.storage.render_path(&input.file_id);
        let render_depth_path = self.storage.render_depth_path(&input.file_id);
        remove_stale(&render_path)?;
        remove_stale(&render_depth_path)?;

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg("--input")
            .arg(&input.gaussians_path)
            .arg("--output")
            .arg(&render_path)
            .arg("--depth-output")
            .arg(&render_depth_path)
            .args(trajectory_args(&input.params));

        tracing::info!(file_id = %input.file_id, "Running renderer");
        run(&self.config.program, cmd)?;
        require_output(&render_path)?;
        require_output(&render_depth_path)?;

        Ok(RenderOutput {
            render_path,
            render_depth_path,
        })
    }
}

/// Flags for the trajectory overrides that were supplied.
fn trajectory_args(params: &RenderParams) -> Vec<String> {
    let mut args = Vec::new();
    let mut push = |flag: &str, value: Option<String>| {
        if let Some(value) = value {
            args.push(flag.to_string());
            args.push(value);
        }
    };

    push("--trajectory-type", params.trajectory_type.map(|t| t.as_str().to_string()));
    push("--lookat-mode", params.lookat_mode.map(|m| m.as_str().to_string()));
    push("--max-disparity", params.max_disparity.map(|v| v.to_string()));
    push("--max-zoom", params.max_zoom.map(|v| v.to_string()));
    push("--distance-m", params.distance_m.map(|v| v.to_string()));
    push("--num-steps", params.num_steps.map(|v| v.to_string()));
    push("--num-repeats", params.num_repeats.map(|v| v.to_string()));
    args
}

fn run(program: &str, mut cmd: Command) -> Result<(), ServiceError> {
    let start = Instant::now();
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|e| ServiceError::Launch {
            program: program.to_string(),
            message: e.to_string(),
        })?;

    tracing::debug!(
        program,
        status = %output.status,
        duration_ms = %start.elapsed().as_millis(),
        "Model command finished"
    );

    if !output.status.success() {
        return Err(ServiceError::Exited {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: stderr_tail(&output.stderr),
        });
    }
    Ok(())
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let skip = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[skip..].join("\n")
}

fn require_input(path: &Path) -> Result<(), ServiceError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ServiceError::InputMissing(path.display().to_string()))
    }
}

/// Delete an output left by an earlier run so it cannot pass for this run's.
fn remove_stale(path: &Path) -> Result<(), ServiceError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Removed previous output");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn require_output(path: &Path) -> Result<(), ServiceError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ServiceError::OutputMissing(path.display().to_string()))
    }
}
