//! mlsharp Common Types
//!
//! Shared record and request types used by the backend and its clients.

pub mod file;
pub mod render;
pub mod task;

pub use file::{FileOutputs, FileRecord};
pub use render::{LookatMode, RenderParams, RenderRequest, TrajectoryType};
pub use task::{new_id, SubmittedJob, TaskRecord, TaskStatus, TaskType, UnknownVariant};
