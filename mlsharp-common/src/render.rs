//! Render parameters accepted by the render endpoint.

use serde::{Deserialize, Serialize};

/// Camera trajectory used when rendering the gaussians.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrajectoryType {
    Swipe,
    Shake,
    Rotate,
    RotateForward,
}

impl TrajectoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrajectoryType::Swipe => "swipe",
            TrajectoryType::Shake => "shake",
            TrajectoryType::Rotate => "rotate",
            TrajectoryType::RotateForward => "rotate_forward",
        }
    }
}

/// Where the camera looks while following the trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookatMode {
    Point,
    Ahead,
}

impl LookatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookatMode::Point => "point",
            LookatMode::Ahead => "ahead",
        }
    }
}

/// Optional overrides for the renderer's trajectory defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderParams {
    #[serde(default)]
    pub trajectory_type: Option<TrajectoryType>,
    #[serde(default)]
    pub lookat_mode: Option<LookatMode>,
    #[serde(default)]
    pub max_disparity: Option<f64>,
    #[serde(default)]
    pub max_zoom: Option<f64>,
    #[serde(default)]
    pub distance_m: Option<f64>,
    #[serde(default)]
    pub num_steps: Option<u32>,
    #[serde(default)]
    pub num_repeats: Option<u32>,
}

impl RenderParams {
    /// Check that every supplied value is usable by the renderer.
    pub fn validate(&self) -> Result<(), String> {
        let positive = [
            ("max_disparity", self.max_disparity),
            ("max_zoom", self.max_zoom),
            ("distance_m", self.distance_m),
        ];
        for (name, value) in positive {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(format!("{name} must be a finite, non-negative number"));
                }
            }
        }
        if self.num_steps == Some(0) {
            return Err("num_steps must be at least 1".to_string());
        }
        if self.num_repeats == Some(0) {
            return Err("num_repeats must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Body of `POST /v1/render`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub file_id: String,
    #[serde(flatten)]
    pub params: RenderParams,
}
